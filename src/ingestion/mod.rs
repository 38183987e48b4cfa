pub mod activity_poller;

pub use activity_poller::run_activity_poller;
