use std::str::FromStr;

use alloy::primitives::Address;
use alloy::signers::local::coins_bip39::English;
use alloy::signers::local::{MnemonicBuilder, PrivateKeySigner};
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::{Normal, Signer};
use polymarket_client_sdk::clob::client::{Client, Config};
use polymarket_client_sdk::clob::types::SignatureType;

const CLOB_HOST: &str = "https://clob.polymarket.com";

pub type AuthenticatedClient = Client<Authenticated<Normal>>;

/// Local signer from a hex-encoded private key (with or without `0x` prefix).
pub fn signer_from_key(private_key: &str) -> anyhow::Result<PrivateKeySigner> {
    Ok(PrivateKeySigner::from_str(private_key.trim())?)
}

/// Signer at `index` on the default BIP-44 Ethereum path (`m/44'/60'/0'/0/{index}`).
pub fn signer_from_mnemonic(phrase: &str, index: u32) -> anyhow::Result<PrivateKeySigner> {
    let signer = MnemonicBuilder::<English>::default()
        .phrase(phrase.trim())
        .index(index)?
        .build()?;
    Ok(signer)
}

/// Lowercased hex address, the form used for pool and lease bookkeeping.
pub fn signer_address(signer: &PrivateKeySigner) -> String {
    signer.address().to_string().to_lowercase()
}

/// Worker signers from explicit keys, or `count` derived from a mnemonic
/// starting at `start_index`. Nothing touches the network.
pub fn load_signers(
    keys: &[String],
    mnemonic: Option<&str>,
    count: u32,
    start_index: u32,
) -> anyhow::Result<Vec<PrivateKeySigner>> {
    if !keys.is_empty() {
        return keys.iter().map(|k| signer_from_key(k)).collect();
    }
    match mnemonic {
        Some(phrase) => (start_index..start_index + count)
            .map(|i| signer_from_mnemonic(phrase, i))
            .collect(),
        None => Ok(Vec::new()),
    }
}

/// Wraps the authenticated Polymarket SDK client and signer.
///
/// Key material is consumed during construction and never stored as a string.
pub struct PolymarketWallet {
    signer: PrivateKeySigner,
    client: AuthenticatedClient,
    /// Proxy wallet whose funds this client's orders spend.
    funder: Option<Address>,
}

impl PolymarketWallet {
    /// Authenticate against the CLOB, deriving or creating an API key as needed.
    /// Orders spend the signer's own funds.
    pub async fn connect(signer: PrivateKeySigner, chain_id: u64) -> anyhow::Result<Self> {
        Self::authenticate(signer, chain_id, None).await
    }

    /// Authenticate with `proxy` as funder: orders are signed by `signer` with
    /// the proxy signature type and spend the proxy's funds.
    pub async fn connect_for_proxy(
        signer: PrivateKeySigner,
        chain_id: u64,
        proxy: &str,
    ) -> anyhow::Result<Self> {
        let funder = Address::from_str(proxy.trim())?;
        Self::authenticate(signer, chain_id, Some(funder)).await
    }

    async fn authenticate(
        signer: PrivateKeySigner,
        chain_id: u64,
        funder: Option<Address>,
    ) -> anyhow::Result<Self> {
        let signer = signer.with_chain_id(Some(chain_id));

        let unauthenticated = Client::new(CLOB_HOST, Config::default())?;
        let builder = unauthenticated.authentication_builder(&signer);
        let builder = match funder {
            Some(funder) => builder.funder(funder).signature_type(SignatureType::Proxy),
            None => builder,
        };
        let client = builder.authenticate().await?;

        tracing::info!(
            address = %signer.address(),
            funder = ?funder,
            "Signer authenticated with CLOB"
        );
        Ok(Self {
            signer,
            client,
            funder,
        })
    }

    pub fn wallet_address(&self) -> String {
        signer_address(&self.signer)
    }

    /// Lowercased proxy address when this client spends a proxy's funds.
    pub fn funder_address(&self) -> Option<String> {
        self.funder.map(|a| a.to_string().to_lowercase())
    }

    /// Borrow the authenticated SDK client.
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    /// Borrow the local signer (needed for order signing).
    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

    #[test]
    fn test_mnemonic_derivation_is_deterministic() {
        let signers = load_signers(&[], Some(TEST_MNEMONIC), 2, 0).unwrap();
        assert_eq!(signers.len(), 2);
        assert_eq!(
            signer_address(&signers[0]),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_ne!(signers[0].address(), signers[1].address());

        let offset = load_signers(&[], Some(TEST_MNEMONIC), 1, 1).unwrap();
        assert_eq!(offset[0].address(), signers[1].address());
    }

    #[test]
    fn test_explicit_keys_take_precedence() {
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string();
        let signers = load_signers(&[key], Some(TEST_MNEMONIC), 5, 0).unwrap();
        assert_eq!(signers.len(), 1);
        assert!(load_signers(&["zz".into()], None, 0, 0).is_err());
    }
}
