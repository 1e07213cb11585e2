//! Contract preparation run once before the oracle pool is registered

use std::time::Duration;

use ethers::types::Address;
use tracing::{info, warn};

use crate::ledger::{bounded, LedgerClient};

/// What the relay learned while preparing the contracts.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ContractsStatus {
    pub owner: Option<Address>,
    pub operational: Option<bool>,
    pub caller_authorized: bool,
}

/// Reports the App contract's operating status and, if asked, authorizes the
/// App contract on the Data contract from the owner account (the first node
/// account). Each call is bounded by `call_timeout`. Failures are logged and
/// the relay keeps going.
pub async fn prepare_contracts(
    ledger: &dyn LedgerClient,
    authorize_caller: bool,
    call_timeout: Duration,
) -> ContractsStatus {
    let mut status = ContractsStatus::default();

    let owner = match bounded(call_timeout, ledger.accounts()).await {
        Ok(accounts) => match accounts.first() {
            Some(owner) => *owner,
            None => {
                warn!("node has no accounts; skipping contract preparation");
                return status;
            }
        },
        Err(err) => {
            warn!(error = %err, "could not list node accounts; skipping contract preparation");
            return status;
        }
    };
    status.owner = Some(owner);

    match bounded(call_timeout, ledger.is_operational(owner)).await {
        Ok(operational) => {
            if operational {
                info!("App contract is operational");
            } else {
                warn!("App contract is paused; oracle responses will be rejected");
            }
            status.operational = Some(operational);
        }
        Err(err) => warn!(error = %err, "could not read App contract operating status"),
    }

    if authorize_caller {
        match bounded(call_timeout, ledger.authorize_caller(owner)).await {
            Ok(tx_hash) => {
                info!(owner = ?owner, ?tx_hash, "App contract authorized on Data contract");
                status.caller_authorized = true;
            }
            Err(err) => warn!(error = %err, "App contract authorization failed"),
        }
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedger;

    const CALL_TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn authorizes_from_the_first_account() {
        let ledger = MockLedger::with_accounts(3);

        let status = prepare_contracts(&ledger, true, CALL_TIMEOUT).await;

        assert_eq!(status.owner, Some(Address::from_low_u64_be(1)));
        assert_eq!(status.operational, Some(true));
        assert!(status.caller_authorized);
        assert!(ledger.is_authorized());
    }

    #[tokio::test]
    async fn skips_authorization_when_disabled() {
        let ledger = MockLedger::with_accounts(3);
        ledger.set_operational(false);

        let status = prepare_contracts(&ledger, false, CALL_TIMEOUT).await;

        assert_eq!(status.operational, Some(false));
        assert!(!status.caller_authorized);
        assert!(!ledger.is_authorized());
    }

    #[tokio::test]
    async fn node_without_accounts_is_not_fatal() {
        let ledger = MockLedger::new();
        assert_eq!(
            prepare_contracts(&ledger, true, CALL_TIMEOUT).await,
            ContractsStatus::default()
        );
    }

    #[tokio::test]
    async fn stalled_authorization_is_abandoned() {
        let ledger = MockLedger::with_accounts(3);
        ledger.delay_authorization(Duration::from_secs(60));

        let status = tokio::time::timeout(
            Duration::from_secs(2),
            prepare_contracts(&ledger, true, Duration::from_millis(20)),
        )
        .await
        .unwrap();

        assert_eq!(status.operational, Some(true));
        assert!(!status.caller_authorized);
    }
}
