use crate::broker::SharedBroker;
use crate::distribution::CoreDistributionLoader;
use crate::error::{BrokerError, Result};
use crate::protocol::message::{Request, Response};
use crate::users::{CoreRequest, MasterAddress};

/// Executes decoded requests against the broker state.
///
/// Handling is synchronous and may read configuration files, so the server
/// runs it on a blocking thread. Files are read before the lock is taken.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    state: SharedBroker,
    loader: CoreDistributionLoader,
}

impl RequestHandler {
    pub fn new(state: SharedBroker, loader: CoreDistributionLoader) -> Self {
        Self { state, loader }
    }

    pub fn state(&self) -> &SharedBroker {
        &self.state
    }

    /// Handle one request and turn the outcome into a response.
    pub fn respond(&self, request: Request) -> Response {
        let kind = request.kind();
        let save_messages = self.state.lock().map(|s| s.save_messages).unwrap_or(false);
        if save_messages {
            tracing::info!(kind, request = ?request, "Request received");
        } else {
            tracing::debug!(kind, request = ?request, "Request received");
        }

        let response = match self.handle(request) {
            Ok(message) => Response::ok(message),
            Err(e) => {
                if e.is_routine() {
                    tracing::debug!(kind, error = %e, "Request denied");
                } else if e.status().code() > 0 {
                    tracing::warn!(kind, error = %e, "Request failed");
                } else {
                    tracing::error!(kind, error = ?e, "Request handler error");
                }
                Response::from_error(&e)
            }
        };

        if save_messages {
            tracing::info!(kind, status = %response.status, message = %response.message, "Response sent");
        } else {
            tracing::debug!(kind, status = %response.status, message = %response.message, "Response sent");
        }
        response
    }

    /// Handle one request, returning the success message.
    pub fn handle(&self, request: Request) -> Result<String> {
        match request {
            Request::SyncUser {
                user,
                address,
                port,
                conn_key,
                cur_jobs,
            } => {
                let master = MasterAddress {
                    address,
                    port,
                    conn_key,
                };
                let outcome = self.state.lock()?.sync_user(&user, master, cur_jobs)?;
                Ok(outcome.message().to_string())
            }

            Request::RequestCore {
                user,
                job_id,
                n_cores,
                mem,
                queue_size,
                node_attr,
            } => {
                if n_cores == 0 {
                    return Err(BrokerError::Protocol("n_cores must be positive".to_string()));
                }
                if !mem.is_finite() || mem < 0.0 {
                    return Err(BrokerError::Protocol(format!("invalid memory request {}", mem)));
                }

                let mut state = self.state.lock()?;
                state.users.set_queue_size(&user, queue_size)?;
                let node = state.request_core(&CoreRequest {
                    user: &user,
                    job_id,
                    n_cores,
                    mem,
                    node_attr: &node_attr,
                })?;
                Ok(node)
            }

            Request::RemoveJob {
                user,
                job_id,
                queue_size,
            } => {
                let mut state = self.state.lock()?;
                state.users.set_queue_size(&user, queue_size)?;
                state.remove_job(&user, job_id)?;
                Ok("Job removed.".to_string())
            }

            Request::ReloadNodes => {
                let specs = self.loader.load_nodes()?;
                self.state.lock()?.reload_nodes(&specs)?;
                Ok("Nodes loaded.".to_string())
            }

            Request::Redistribute => {
                let rules = self.loader.load_rules()?;
                let allowed = self.loader.load_allowed_users()?;
                self.state.lock()?.distribute(&rules, allowed)?;
                Ok("Cores distributed.".to_string())
            }

            Request::ShowStatus => Ok(self.state.lock()?.status_report()),

            Request::ShowVariables => Ok(self.state.lock()?.variables_report()),

            Request::SaveMessages(on) => {
                self.state.lock()?.save_messages = on;
                Ok(if on {
                    "Messages will be saved.".to_string()
                } else {
                    "Messages will not be saved.".to_string()
                })
            }

            Request::Finish => Ok("Finishing broker.".to_string()),
        }
    }
}
