//! # Target Selection
//!
//! Resolves which provider executes a call when several dispatchers offer
//! the same service. Provider lists arrive sorted by dispatcher id, so
//! every strategy is deterministic.

use dm_connectivity::ConnectivityManager;
use dm_types::{DispatchError, DispatcherId, TargetSelector};
use tracing::debug;

/// Pick the executing dispatcher for `service` from `providers`.
///
/// A sole provider with no explicit policy short-circuits; otherwise the
/// configured strategy decides.
pub fn resolve_target(
    service: &str,
    providers: &[DispatcherId],
    selector: TargetSelector,
    requested_target: Option<&DispatcherId>,
    connectivity: &ConnectivityManager,
) -> Result<DispatcherId, DispatchError> {
    debug_assert!(!providers.is_empty());

    if providers.len() == 1 && selector == TargetSelector::First && requested_target.is_none() {
        return Ok(providers[0].clone());
    }

    match selector {
        TargetSelector::First => Ok(providers[0].clone()),
        TargetSelector::Dispatcher => {
            let Some(target) = requested_target else {
                return Err(DispatchError::AssignmentInvalid {
                    service: service.to_string(),
                    reason: "dispatcher selector requires a target id".to_string(),
                });
            };
            if providers.contains(target) {
                Ok(target.clone())
            } else {
                Err(DispatchError::AssignmentInvalid {
                    service: service.to_string(),
                    reason: format!("dispatcher {target} does not provide the service"),
                })
            }
        }
        TargetSelector::Host => {
            let local_host = connectivity.local_status().host;
            providers
                .iter()
                .find(|id| {
                    connectivity
                        .peer(id)
                        .map(|status| status.host == local_host)
                        .unwrap_or(false)
                })
                .cloned()
                .ok_or_else(|| DispatchError::AssignmentInvalid {
                    service: service.to_string(),
                    reason: format!("no provider on host {local_host}"),
                })
        }
        TargetSelector::Master => {
            let Some(master) = connectivity.master() else {
                return Err(DispatchError::AssignmentInvalid {
                    service: service.to_string(),
                    reason: "no master elected".to_string(),
                });
            };
            if providers.contains(&master) {
                Ok(master)
            } else {
                Err(DispatchError::AssignmentInvalid {
                    service: service.to_string(),
                    reason: format!("master {master} does not provide the service"),
                })
            }
        }
        // Load measurement is not wired up; behave like First so the call
        // still lands somewhere deterministic.
        TargetSelector::CpuUsage | TargetSelector::FreeRam => {
            debug!(service, "Load-based selector resolved as first provider");
            Ok(providers[0].clone())
        }
    }
}
