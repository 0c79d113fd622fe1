use crate::data::models::PlayerId;
use crate::refresh::broker::{Broker, BrokerError, CallResult};
use crate::refresh::domain::DomainSet;
use crate::refresh::message::Origin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Refreshes a single player right now and waits a bounded time for the result.
///
/// Dropping the returned future only stops waiting; the worker keeps going
/// and its late result is discarded by the broker.
#[derive(Clone)]
pub struct OnDemandRefresher {
    broker: Arc<Broker>,
}

impl OnDemandRefresher {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    /// Ask a worker to refresh `domains` of `player_id`.
    ///
    /// Resolves with the worker's outcome, or [`CallResult::TimedOut`] once
    /// `timeout` elapses. Only a transport failure is an error.
    #[tracing::instrument(skip(self), fields(player_id = %player_id, domains = %domains))]
    pub async fn request_refresh(
        &self,
        player_id: PlayerId,
        domains: DomainSet,
        timeout: Duration,
    ) -> Result<CallResult, BrokerError> {
        let reply = self
            .broker
            .call(player_id, domains, Origin::OnDemand, timeout)
            .await?;
        let correlation_id = reply.correlation_id();

        let result = reply.await;
        match &result {
            CallResult::Completed(outcome) => {
                debug!(%correlation_id, %outcome, "On-demand refresh finished")
            }
            CallResult::TimedOut => {
                info!(%correlation_id, "On-demand refresh timed out, worker result will be discarded")
            }
        }
        Ok(result)
    }
}
