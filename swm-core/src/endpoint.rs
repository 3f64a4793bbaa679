//! Sub-Wallet Service Endpoint (C5): authenticates, decrypts, dispatches,
//! and responds to one request event for one sub-wallet. Dispatch is a
//! method-name match over a decrypted NIP-47 payload; NIP-44 framing
//! mirrors a standard NWC client's encrypt/decrypt pairing.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use lightning_invoice::Bolt11Invoice;
use serde::Serialize;
use swm_api::error::ErrorPayload;
use swm_api::protocol::{
    GetBalanceResult, InvoiceStateWire, LookupInvoiceParams, LookupInvoiceResult,
    MakeInvoiceParams, MakeInvoiceResult, MethodName, PayInvoiceParams, PayInvoiceResult, Request,
    Response,
};
use swm_ledger::{FindPendingInvoiceFilter, InvoiceState, LedgerStore, RegisterPendingInvoiceInput};
use swm_upstream::{MakeInvoiceArgs, UpstreamResult, UpstreamWallet};
use tracing::instrument;

use crate::config::UpstreamTimeouts;
use crate::correlator::Correlator;
use crate::error::HandlerError;
use crate::registry::SubWalletContext;

/// The `ServicePubkey`/`ClientPubkey` stored on a SubAccount are 33-byte
/// compressed secp256k1 points (the ledger's routing identity); NIP-44
/// operates on the 32-byte x-only encoding of the same curve point (BIP-340).
/// Both are derived from the identical secret scalar, so no separate keypair
/// is needed for transport crypto — the x-only key is just the compressed
/// key's last 32 bytes, with the leading parity byte dropped.
fn to_nostr_pubkey(compressed: &[u8; 33]) -> anyhow::Result<nostr::PublicKey> {
    Ok(nostr::PublicKey::from_slice(&compressed[1..])?)
}

fn to_nostr_secret(secret: &[u8; 32]) -> anyhow::Result<nostr::SecretKey> {
    Ok(nostr::SecretKey::from_slice(secret)?)
}

/// Everything one sub-wallet's handlers need, bundled so the router can hand
/// it to a per-key worker task without threading each dependency through
/// every call.
pub struct Endpoint {
    pub ledger: Arc<LedgerStore>,
    pub upstream: Arc<dyn UpstreamWallet>,
    pub correlator: Arc<Correlator>,
    timeouts: UpstreamTimeouts,
}

impl Endpoint {
    pub fn new(
        ledger: Arc<LedgerStore>,
        upstream: Arc<dyn UpstreamWallet>,
        correlator: Arc<Correlator>,
        timeouts: UpstreamTimeouts,
    ) -> Self {
        Self {
            ledger,
            upstream,
            correlator,
            timeouts,
        }
    }

    /// Full request lifecycle for one NIP-44-encrypted event: decrypt,
    /// dispatch, encrypt the response. Decryption or parse failures are
    /// infrastructure errors, not handler errors: they cause the request to
    /// be dropped (logged, not responded to, not re-queued) since the
    /// client cannot be told about a ciphertext it can't see.
    pub async fn handle_encrypted(
        &self,
        ctx: &SubWalletContext,
        ciphertext: &[u8],
    ) -> Option<Vec<u8>> {
        let request = match self.decrypt_request(ctx, ciphertext) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(sub_wallet = %ctx.account.id, error = %e, "dropping undecryptable request");
                return None;
            }
        };

        let response = self.handle(ctx, request).await;

        match self.encrypt_response(ctx, &response) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(sub_wallet = %ctx.account.id, error = %e, "failed to encrypt response");
                None
            }
        }
    }

    fn decrypt_request(&self, ctx: &SubWalletContext, ciphertext: &[u8]) -> anyhow::Result<Request> {
        let service_sk = to_nostr_secret(&ctx.service_secret)?;
        let client_pk = to_nostr_pubkey(&ctx.account.client_pubkey.0)?;
        let plaintext = nostr::nips::nip44::decrypt(&service_sk, &client_pk, ciphertext)?;
        Ok(serde_json::from_str(&plaintext)?)
    }

    fn encrypt_response(&self, ctx: &SubWalletContext, response: &Response) -> anyhow::Result<Vec<u8>> {
        self.encrypt_payload(ctx, response)
    }

    /// Encrypts a server-initiated notification (e.g. `payment_received`)
    /// for the sub-wallet's client, using the same NIP-44 framing as a
    /// request/response pair — a notification is just a payload the client
    /// didn't ask for this time.
    pub fn encrypt_notification(
        &self,
        ctx: &SubWalletContext,
        notification: &swm_api::Notification,
    ) -> anyhow::Result<Vec<u8>> {
        self.encrypt_payload(ctx, notification)
    }

    fn encrypt_payload(&self, ctx: &SubWalletContext, payload: &impl Serialize) -> anyhow::Result<Vec<u8>> {
        let service_sk = to_nostr_secret(&ctx.service_secret)?;
        let client_pk = to_nostr_pubkey(&ctx.account.client_pubkey.0)?;
        let plaintext = serde_json::to_string(payload)?;
        let encrypted = nostr::nips::nip44::encrypt(
            &service_sk,
            &client_pk,
            &plaintext,
            nostr::nips::nip44::Version::default(),
        )?;
        Ok(encrypted.into_bytes())
    }

    /// Dispatches one decrypted request for the given sub-wallet and builds
    /// the response payload, translating any handler failure into the wire
    /// error shape rather than propagating it — a failed request must still
    /// produce a response event rather than being silently dropped.
    #[instrument(skip_all, name = "endpoint_handle", fields(method = ?request.method, sub_wallet = %ctx.account.id))]
    pub async fn handle(&self, ctx: &SubWalletContext, request: Request) -> Response {
        let result = match request.method {
            MethodName::GetBalance => self.get_balance(ctx).await,
            MethodName::GetInfo => self.get_info().await,
            MethodName::MakeInvoice => self.make_invoice(ctx, request.params).await,
            MethodName::PayInvoice => self.pay_invoice(ctx, request.params).await,
            MethodName::LookupInvoice => self.lookup_invoice(request.params).await,
        };

        let touch = swm_ledger::TouchSubAccountInput {
            increment_usage: true,
            update_last_used: true,
        };
        if let Err(e) = self.ledger.touch_sub_account(&ctx.account.id, touch) {
            tracing::warn!(error = %e, "failed to record sub-wallet usage");
        }

        match result {
            Ok((result_type, value)) => Response::ok(result_type, value),
            Err(e) => Response::err(request.method, ErrorPayload::from(e.to_mux_error())),
        }
    }

    async fn get_balance(
        &self,
        ctx: &SubWalletContext,
    ) -> Result<(MethodName, serde_json::Value), HandlerError> {
        let value = serde_json::to_value(GetBalanceResult {
            balance: ctx.account.balance_msats.max(0) as u64,
        })
        .expect("GetBalanceResult serialization cannot fail");
        Ok((MethodName::GetBalance, value))
    }

    async fn get_info(&self) -> Result<(MethodName, serde_json::Value), HandlerError> {
        let info = with_upstream_timeout(self.timeouts.info, "get_info", self.upstream.get_info()).await?;
        let value = serde_json::to_value(info).expect("UpstreamInfo serialization cannot fail");
        Ok((MethodName::GetInfo, value))
    }

    async fn make_invoice(
        &self,
        ctx: &SubWalletContext,
        params: serde_json::Value,
    ) -> Result<(MethodName, serde_json::Value), HandlerError> {
        let params: MakeInvoiceParams = serde_json::from_value(params)
            .map_err(|e| HandlerError::InvalidInput(e.to_string()))?;

        let upstream_result = with_upstream_timeout(
            self.timeouts.make_invoice,
            "make_invoice",
            self.upstream.make_invoice(MakeInvoiceArgs {
                amount_msats: params.amount_msats,
                description: params.description.clone(),
                description_hash: params.description_hash.clone(),
                expiry_secs: params.expiry.unwrap_or(3600),
            }),
        )
        .await?;

        let expires_at = swm_common::TimestampMs::now().as_unix_secs()
            + i64::from(params.expiry.unwrap_or(3600));

        let pending = self.ledger.register_pending_invoice(RegisterPendingInvoiceInput {
            sub_account_id: ctx.account.id.clone(),
            invoice: Some(upstream_result.invoice.clone()),
            payment_hash: Some(upstream_result.payment_hash.clone()),
            description_hash: params.description_hash.clone(),
            amount_msats: params.amount_msats as i64,
            expires_at: Some(expires_at),
            raw: None,
        })?;

        let value = serde_json::to_value(MakeInvoiceResult {
            invoice: upstream_result.invoice,
            payment_hash: upstream_result.payment_hash,
            amount: params.amount_msats,
            expires_at: Some(pending.expires_at.unwrap_or(expires_at)),
        })
        .expect("MakeInvoiceResult serialization cannot fail");
        Ok((MethodName::MakeInvoice, value))
    }

    async fn pay_invoice(
        &self,
        ctx: &SubWalletContext,
        params: serde_json::Value,
    ) -> Result<(MethodName, serde_json::Value), HandlerError> {
        let params: PayInvoiceParams = serde_json::from_value(params)
            .map_err(|e| HandlerError::InvalidInput(e.to_string()))?;

        let amt_msats = resolve_pay_amount(&params)?;

        if ctx.account.balance_msats < amt_msats as i64 {
            return Err(HandlerError::Ledger(swm_ledger::LedgerError::InsufficientBalance {
                have: ctx.account.balance_msats,
                need: amt_msats as i64,
            }));
        }

        let upstream_result = with_upstream_timeout(
            self.timeouts.pay_invoice,
            "pay_invoice",
            self.upstream.pay_invoice(&params.invoice),
        )
        .await?;
        self.ledger.adjust_balance(&ctx.account.id, -(amt_msats as i64))?;

        let value = serde_json::to_value(PayInvoiceResult {
            preimage: upstream_result.payment_hash,
            fees_paid: Some(upstream_result.fee_msats),
        })
        .expect("PayInvoiceResult serialization cannot fail");
        Ok((MethodName::PayInvoice, value))
    }

    async fn lookup_invoice(
        &self,
        params: serde_json::Value,
    ) -> Result<(MethodName, serde_json::Value), HandlerError> {
        let params: LookupInvoiceParams = serde_json::from_value(params)
            .map_err(|e| HandlerError::InvalidInput(e.to_string()))?;

        let upstream_result = with_upstream_timeout(
            self.timeouts.lookup_invoice,
            "lookup_invoice",
            self.upstream
                .lookup_invoice(params.payment_hash.as_deref(), params.invoice.as_deref()),
        )
        .await?;

        match upstream_result.status {
            swm_upstream::UpstreamInvoiceStatus::Settled => {
                // Hands off to a freshly spawned task rather than reconciling
                // inline: the correlator must never run re-entrantly on a
                // handler's own call stack.
                self.correlator.spawn_reconcile_from_lookup(
                    params.payment_hash.clone(),
                    params.invoice.clone(),
                    None,
                    upstream_result.amount_received_msats.unwrap_or(0) as i64,
                    upstream_result
                        .settled_at_unix
                        .map(swm_common::TimestampMs::from_unix_secs)
                        .unwrap_or_else(swm_common::TimestampMs::now),
                );
            }
            swm_upstream::UpstreamInvoiceStatus::Failed => {
                self.fail_pending_invoice(params.payment_hash.clone(), params.invoice.clone());
            }
            swm_upstream::UpstreamInvoiceStatus::Pending => {}
        }

        let state = match upstream_result.status {
            swm_upstream::UpstreamInvoiceStatus::Pending => InvoiceStateWire::Pending,
            swm_upstream::UpstreamInvoiceStatus::Settled => InvoiceStateWire::Settled,
            swm_upstream::UpstreamInvoiceStatus::Failed => InvoiceStateWire::Failed,
        };
        let value = serde_json::to_value(LookupInvoiceResult {
            invoice: params.invoice,
            payment_hash: Some(upstream_result.payment_hash),
            amount: upstream_result.amount_received_msats.unwrap_or(0),
            state,
            settled_at: upstream_result.settled_at_unix,
        })
        .expect("LookupInvoiceResult serialization cannot fail");
        Ok((MethodName::LookupInvoice, value))
    }

    /// Transitions the matching `PendingInvoice` to `failed`, releasing its
    /// `pending_msats` share, when upstream reports a payment attempt (or an
    /// invoice we issued) as failed. A no-op if nothing matches or the
    /// invoice already reached a terminal state — same matching order as
    /// settlement, just without a balance credit.
    fn fail_pending_invoice(&self, payment_hash: Option<String>, invoice: Option<String>) {
        let filter = FindPendingInvoiceFilter {
            payment_hash,
            invoice,
            description_hash: None,
        };
        match self.ledger.find_pending_invoice(&filter) {
            Ok(Some(pending)) if !pending.state.is_terminal() => {
                if let Err(e) = self.ledger.update_pending_invoice_state(&pending.id, InvoiceState::Failed, None) {
                    tracing::warn!(pending_invoice_id = %pending.id, error = %e, "failed to mark invoice failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to look up pending invoice for a failed-status report"),
        }
    }
}

/// Runs an upstream call under a per-operation deadline, mapping an elapsed
/// timeout to the same `HandlerError` a client sees for any other upstream
/// failure.
async fn with_upstream_timeout<T>(
    duration: std::time::Duration,
    op: &'static str,
    fut: impl Future<Output = UpstreamResult<T>>,
) -> Result<T, HandlerError> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(HandlerError::Timeout(op.to_string())),
    }
}

/// Resolves the msats amount to pay: the amount embedded in the BOLT11
/// invoice when it carries one, else the client-supplied override. Fails
/// `missing_amount` when neither is present.
fn resolve_pay_amount(params: &PayInvoiceParams) -> Result<u64, HandlerError> {
    let embedded = Bolt11Invoice::from_str(&params.invoice)
        .ok()
        .and_then(|invoice| invoice.amount_milli_satoshis());

    embedded.or(params.amount_msats).ok_or(HandlerError::MissingAmount)
}

fn invoice_state_to_wire(state: InvoiceState) -> InvoiceStateWire {
    match state {
        InvoiceState::Pending => InvoiceStateWire::Pending,
        InvoiceState::Settled => InvoiceStateWire::Settled,
        InvoiceState::Failed => InvoiceStateWire::Failed,
        InvoiceState::Expired => InvoiceStateWire::Expired,
    }
}

#[cfg(test)]
mod tests {
    use swm_common::rng::SysRng;
    use swm_ledger::CreateSubAccountInput;
    use swm_vault::Vault;

    use super::*;
    use crate::correlator::Correlator;

    async fn fixture() -> (Arc<LedgerStore>, SubWalletContext, Arc<swm_upstream::MockUpstreamWallet>, Endpoint) {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = Arc::new(Vault::from_master_key(&"cd".repeat(32)));
        let mut rng = SysRng::new();
        let (account, secrets) = ledger
            .create_sub_account(
                CreateSubAccountInput {
                    label: "endpoint-fixture".to_string(),
                    ..Default::default()
                },
                &mut rng,
                &vault,
            )
            .unwrap();
        let ctx = SubWalletContext {
            account,
            service_secret: secrets.service_secret,
            client_secret: secrets.client_secret,
        };
        let upstream = Arc::new(swm_upstream::MockUpstreamWallet::new());
        let (correlator, _settlement_rx) = Correlator::new(Arc::clone(&ledger));
        let endpoint = Endpoint::new(
            Arc::clone(&ledger),
            upstream.clone() as Arc<dyn UpstreamWallet>,
            correlator,
            UpstreamTimeouts::default(),
        );
        (ledger, ctx, upstream, endpoint)
    }

    #[tokio::test]
    async fn handle_encrypted_round_trips_through_nip44() {
        let (_ledger, ctx, _upstream, endpoint) = fixture().await;

        let client_sk = to_nostr_secret(&ctx.client_secret).unwrap();
        let service_pk = to_nostr_pubkey(&ctx.account.service_pubkey.0).unwrap();
        let request_json = serde_json::to_string(&Request {
            method: MethodName::GetBalance,
            params: serde_json::Value::Null,
        })
        .unwrap();
        let ciphertext = nostr::nips::nip44::encrypt(
            &client_sk,
            &service_pk,
            &request_json,
            nostr::nips::nip44::Version::default(),
        )
        .unwrap()
        .into_bytes();

        let response_bytes = endpoint
            .handle_encrypted(&ctx, &ciphertext)
            .await
            .expect("a well-formed request must produce a response");

        // Decrypting with the client's own secret and the service's pubkey
        // recovers the same shared secret the service used to encrypt,
        // since NIP-44's ECDH is symmetric in the two parties.
        let plaintext = nostr::nips::nip44::decrypt(&client_sk, &service_pk, &response_bytes).unwrap();
        let response: Response = serde_json::from_str(&plaintext).unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn handle_encrypted_drops_undecryptable_ciphertext() {
        let (_ledger, ctx, _upstream, endpoint) = fixture().await;
        let result = endpoint.handle_encrypted(&ctx, b"not valid nip44").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn get_balance_reflects_ledger_state() {
        let (_ledger, ctx, _upstream, endpoint) = fixture().await;
        let response = endpoint
            .handle(
                &ctx,
                Request {
                    method: MethodName::GetBalance,
                    params: serde_json::Value::Null,
                },
            )
            .await;
        let result: GetBalanceResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.balance, 0);
    }

    #[tokio::test]
    async fn pay_invoice_without_balance_fails_insufficient_balance() {
        let (_ledger, ctx, _upstream, endpoint) = fixture().await;
        let response = endpoint
            .handle(
                &ctx,
                Request {
                    method: MethodName::PayInvoice,
                    params: serde_json::to_value(PayInvoiceParams {
                        invoice: "lnmock1deadbeef1000".to_string(),
                        amount_msats: Some(1000),
                    })
                    .unwrap(),
                },
            )
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, swm_api::ErrorKind::InsufficientBalance);
    }

    #[tokio::test]
    async fn pay_invoice_without_amount_fails_missing_amount() {
        let (_ledger, ctx, _upstream, endpoint) = fixture().await;
        let response = endpoint
            .handle(
                &ctx,
                Request {
                    method: MethodName::PayInvoice,
                    params: serde_json::to_value(PayInvoiceParams {
                        invoice: "lnmock1deadbeef".to_string(),
                        amount_msats: None,
                    })
                    .unwrap(),
                },
            )
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, swm_api::ErrorKind::InvoiceAmountMissing);
    }

    #[tokio::test]
    async fn make_invoice_registers_a_pending_invoice() {
        let (ledger, ctx, _upstream, endpoint) = fixture().await;
        let response = endpoint
            .handle(
                &ctx,
                Request {
                    method: MethodName::MakeInvoice,
                    params: serde_json::to_value(MakeInvoiceParams {
                        amount_msats: 500_000,
                        description: Some("coffee".to_string()),
                        description_hash: None,
                        expiry: Some(3600),
                    })
                    .unwrap(),
                },
            )
            .await;
        assert!(response.error.is_none());
        let pending = ledger.list_pending_invoices(&ctx.account.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].amount_msats, 500_000);
    }

    #[tokio::test]
    async fn lookup_invoice_reporting_failed_releases_the_pending_reservation() {
        let (ledger, ctx, upstream, endpoint) = fixture().await;
        let make_response = endpoint
            .handle(
                &ctx,
                Request {
                    method: MethodName::MakeInvoice,
                    params: serde_json::to_value(MakeInvoiceParams {
                        amount_msats: 250_000,
                        description: None,
                        description_hash: None,
                        expiry: Some(3600),
                    })
                    .unwrap(),
                },
            )
            .await;
        let made: MakeInvoiceResult = serde_json::from_value(make_response.result.unwrap()).unwrap();

        let refreshed = ledger.get_sub_account_by_id(&ctx.account.id).unwrap().unwrap();
        assert_eq!(refreshed.pending_msats, 250_000);

        upstream.fail(&made.payment_hash);

        let lookup_response = endpoint
            .handle(
                &ctx,
                Request {
                    method: MethodName::LookupInvoice,
                    params: serde_json::to_value(LookupInvoiceParams {
                        payment_hash: Some(made.payment_hash),
                        invoice: None,
                    })
                    .unwrap(),
                },
            )
            .await;
        let result: LookupInvoiceResult = serde_json::from_value(lookup_response.result.unwrap()).unwrap();
        assert_eq!(result.state, InvoiceStateWire::Failed);

        let account_after = ledger.get_sub_account_by_id(&ctx.account.id).unwrap().unwrap();
        assert_eq!(account_after.pending_msats, 0, "a failed invoice must release its reservation");
    }

    struct StallingUpstream;

    #[async_trait::async_trait]
    impl UpstreamWallet for StallingUpstream {
        async fn get_info(&self) -> UpstreamResult<swm_upstream::UpstreamInfo> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            unreachable!("the timeout must fire before this call returns");
        }

        async fn make_invoice(
            &self,
            _args: swm_upstream::MakeInvoiceArgs,
        ) -> UpstreamResult<swm_upstream::MakeInvoiceResult> {
            unimplemented!()
        }

        async fn pay_invoice(&self, _invoice: &str) -> UpstreamResult<swm_upstream::PayInvoiceResult> {
            unimplemented!()
        }

        async fn lookup_invoice(
            &self,
            _payment_hash: Option<&str>,
            _invoice: Option<&str>,
        ) -> UpstreamResult<swm_upstream::LookupInvoiceResult> {
            unimplemented!()
        }

        fn supports_notifications(&self) -> bool {
            false
        }

        fn subscribe_payments(&self) -> Option<tokio::sync::mpsc::Receiver<swm_upstream::PaymentReceivedNotification>> {
            None
        }
    }

    #[tokio::test]
    async fn get_info_past_its_budget_surfaces_as_a_timeout_error() {
        let ledger = Arc::new(LedgerStore::open_in_memory().unwrap());
        let vault = Arc::new(Vault::from_master_key(&"cd".repeat(32)));
        let mut rng = SysRng::new();
        let (account, secrets) = ledger
            .create_sub_account(
                CreateSubAccountInput {
                    label: "timeout-fixture".to_string(),
                    ..Default::default()
                },
                &mut rng,
                &vault,
            )
            .unwrap();
        let ctx = SubWalletContext {
            account,
            service_secret: secrets.service_secret,
            client_secret: secrets.client_secret,
        };
        let (correlator, _settlement_rx) = Correlator::new(Arc::clone(&ledger));
        let endpoint = Endpoint::new(
            Arc::clone(&ledger),
            Arc::new(StallingUpstream) as Arc<dyn UpstreamWallet>,
            correlator,
            UpstreamTimeouts {
                info: std::time::Duration::from_millis(10),
                ..UpstreamTimeouts::default()
            },
        );

        let response = endpoint
            .handle(
                &ctx,
                Request {
                    method: MethodName::GetInfo,
                    params: serde_json::Value::Null,
                },
            )
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, swm_api::ErrorKind::Timeout);
    }
}
