//! Solana RPC chain client: SPL transfers at `confirmed` commitment.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::{UiTransactionEncoding, UiTransactionTokenBalance};
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use std::str::FromStr;

use super::{ChainClient, TokenTransfer};
use crate::config::USDC_MINT;

pub struct SolanaChain {
    rpc: RpcClient,
    mint: Pubkey,
}

impl SolanaChain {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(
                rpc_url.to_string(),
                CommitmentConfig::confirmed(),
            ),
            mint: Pubkey::from_str(USDC_MINT).expect("USDC mint constant is a valid pubkey"),
        }
    }

    fn parse_wallet(wallet: &str) -> Result<Pubkey, String> {
        Pubkey::from_str(wallet).map_err(|e| format!("invalid wallet address {}: {}", wallet, e))
    }

    /// Net change of `owner`'s balance for our mint across a transaction.
    fn owner_delta(
        pre: &[UiTransactionTokenBalance],
        post: &[UiTransactionTokenBalance],
        owner: &str,
        mint: &str,
    ) -> i128 {
        let sum = |balances: &[UiTransactionTokenBalance]| -> i128 {
            balances
                .iter()
                .filter(|b| {
                    b.mint == mint
                        && Option::<String>::from(b.owner.clone()).as_deref() == Some(owner)
                })
                .filter_map(|b| b.ui_token_amount.amount.parse::<i128>().ok())
                .sum()
        };
        sum(post) - sum(pre)
    }
}

#[async_trait]
impl ChainClient for SolanaChain {
    async fn sol_balance(&self, wallet: &str) -> Result<u64, String> {
        let pubkey = Self::parse_wallet(wallet)?;
        self.rpc
            .get_balance(&pubkey)
            .await
            .map_err(|e| format!("getBalance failed: {}", e))
    }

    async fn token_balance(&self, wallet: &str) -> Result<u64, String> {
        let owner = Self::parse_wallet(wallet)?;
        let ata = get_associated_token_address(&owner, &self.mint);
        match self.rpc.get_token_account_balance(&ata).await {
            Ok(balance) => balance
                .amount
                .parse()
                .map_err(|e| format!("unparseable token amount: {}", e)),
            // A wallet that never held the token has no ATA yet
            Err(e) if e.to_string().contains("could not find account") => Ok(0),
            Err(e) if e.to_string().contains("AccountNotFound") => Ok(0),
            Err(e) => Err(format!("getTokenAccountBalance failed: {}", e)),
        }
    }

    async fn transfer_token(
        &self,
        from: &Keypair,
        to_wallet: &str,
        amount: u64,
    ) -> Result<String, String> {
        let to_owner = Self::parse_wallet(to_wallet)?;
        let from_ata = get_associated_token_address(&from.pubkey(), &self.mint);
        let to_ata = get_associated_token_address(&to_owner, &self.mint);

        let instructions = vec![
            create_associated_token_account_idempotent(
                &from.pubkey(),
                &to_owner,
                &self.mint,
                &spl_token::id(),
            ),
            spl_token::instruction::transfer(
                &spl_token::id(),
                &from_ata,
                &to_ata,
                &from.pubkey(),
                &[],
                amount,
            )
            .map_err(|e| format!("transfer instruction: {}", e))?,
        ];

        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| format!("getLatestBlockhash failed: {}", e))?;

        let tx = Transaction::new_signed_with_payer(
            &instructions,
            Some(&from.pubkey()),
            &[from],
            blockhash,
        );

        let signature = self
            .rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| format!("transfer failed: {}", e))?;

        log::info!(
            "[CHAIN] Transferred {} base units to {} ({})",
            amount,
            to_wallet,
            signature
        );
        Ok(signature.to_string())
    }

    async fn transfer_sol(
        &self,
        from: &Keypair,
        to_wallet: &str,
        lamports: u64,
    ) -> Result<String, String> {
        let to = Self::parse_wallet(to_wallet)?;
        let instruction = system_instruction::transfer(&from.pubkey(), &to, lamports);

        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| format!("getLatestBlockhash failed: {}", e))?;

        let tx = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&from.pubkey()),
            &[from],
            blockhash,
        );

        let signature = self
            .rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| format!("SOL transfer failed: {}", e))?;
        Ok(signature.to_string())
    }

    async fn recent_token_transfers(
        &self,
        wallet: &str,
        limit: usize,
    ) -> Result<Vec<TokenTransfer>, String> {
        let owner = Self::parse_wallet(wallet)?;
        let ata = get_associated_token_address(&owner, &self.mint);

        let statuses = self
            .rpc
            .get_signatures_for_address_with_config(
                &ata,
                GetConfirmedSignaturesForAddress2Config {
                    limit: Some(limit),
                    commitment: Some(CommitmentConfig::confirmed()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| format!("getSignaturesForAddress failed: {}", e))?;

        let mint = self.mint.to_string();
        let mut transfers = Vec::new();

        for status in statuses {
            if status.err.is_some() {
                continue;
            }
            let signature = Signature::from_str(&status.signature)
                .map_err(|e| format!("bad signature {}: {}", status.signature, e))?;

            let tx = match self
                .rpc
                .get_transaction(&signature, UiTransactionEncoding::JsonParsed)
                .await
            {
                Ok(tx) => tx,
                Err(e) => {
                    log::warn!("[CHAIN] getTransaction {} failed: {}", status.signature, e);
                    continue;
                }
            };

            let Some(meta) = tx.transaction.meta else {
                continue;
            };
            let pre: Vec<UiTransactionTokenBalance> =
                Option::from(meta.pre_token_balances).unwrap_or_default();
            let post: Vec<UiTransactionTokenBalance> =
                Option::from(meta.post_token_balances).unwrap_or_default();

            let delta = Self::owner_delta(&pre, &post, wallet, &mint);
            if delta <= 0 {
                // Outgoing or unrelated - the watcher only wants inbound
                continue;
            }

            // The counterparty is whichever owner's balance went down
            let sender = pre
                .iter()
                .chain(post.iter())
                .filter_map(|b| Option::<String>::from(b.owner.clone()))
                .filter(|o| o != wallet)
                .find(|o| Self::owner_delta(&pre, &post, o, &mint) < 0)
                .unwrap_or_else(|| "unknown".to_string());

            transfers.push(TokenTransfer {
                signature: status.signature,
                sender,
                amount: delta as u64,
            });
        }

        Ok(transfers)
    }
}
