//! Example: Signing an L1 action offline.
//!
//! Run with: cargo run --example signing

use hyperliquid_api_client::auth::{LocalSigner, Network, action_hash, l1_typed_data};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Well-known development key, never fund it.
    let signer =
        LocalSigner::from_hex("0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")?;
    let action = json!({ "type": "cancel", "cancels": [{ "a": 0, "o": 91490942 }] });
    let nonce = 1_700_000_000_000;

    let connection_id = action_hash(&action, nonce, None, None)?;
    let typed_data = l1_typed_data(connection_id, Network::Testnet);
    let digest = typed_data.digest()?;
    let signature = signer.sign_hash(&digest)?;

    println!("Signer:        {}", signer.address());
    println!("Connection id: {connection_id}");
    println!("Digest:        {digest}");
    println!("Signature:     {}", serde_json::to_string(&signature)?);
    println!("Recovered:     {}", signature.recover_address(&digest)?);
    Ok(())
}
