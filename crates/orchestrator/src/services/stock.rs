//! Stock service: verifies, reserves, and releases stock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use common::SaleItem;
use futures_util::StreamExt;
use messaging::{MessageChannel, routing};
use saga_store::StepResult;

use crate::error::Result;
use crate::messages::{CommandPayload, ReplyOutcome, SagaCommand};
use crate::services::publish_reply;

#[derive(Debug, Default)]
struct StockState {
    reservations: HashMap<String, Vec<SaleItem>>,
    next_id: u32,
    released: u32,
    fail_on_verify: bool,
    fail_on_reserve: bool,
    fail_on_release: bool,
    silent: bool,
}

/// In-memory stock service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockService {
    state: Arc<RwLock<StockState>>,
}

impl InMemoryStockService {
    /// Creates a new in-memory stock service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next verify calls (business rejection).
    pub fn set_fail_on_verify(&self, fail: bool) {
        self.state.write().unwrap().fail_on_verify = fail;
    }

    /// Rejects the next reserve calls (business rejection).
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.state.write().unwrap().fail_on_reserve = fail;
    }

    /// Rejects the next release calls, exercising compensation retries.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.state.write().unwrap().fail_on_release = fail;
    }

    /// Stops replying altogether, exercising step timeouts.
    pub fn set_silent(&self, silent: bool) {
        self.state.write().unwrap().silent = silent;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reservations.len()
    }

    /// Returns true if a reservation exists with the given ID.
    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .reservations
            .contains_key(reservation_id)
    }

    /// Returns the number of releases performed.
    pub fn released_count(&self) -> u32 {
        self.state.read().unwrap().released
    }

    /// Consumes the stock command queue until the channel closes.
    pub async fn run<C: MessageChannel>(self, channel: Arc<C>) -> Result<()> {
        let mut commands = channel.consume(routing::STOCK_COMMAND_QUEUE).await?;
        while let Some(message) = commands.next().await {
            let command: SagaCommand = match serde_json::from_value(message.payload.clone()) {
                Ok(command) => command,
                Err(error) => {
                    tracing::warn!(%error, "stock service received malformed command");
                    let _ = channel.dead_letter(message, "malformed command").await;
                    continue;
                }
            };
            let Some(outcome) = self.handle(&command) else {
                continue;
            };
            publish_reply(&*channel, &command, outcome).await;
        }
        Ok(())
    }

    fn handle(&self, command: &SagaCommand) -> Option<ReplyOutcome> {
        let mut state = self.state.write().unwrap();
        if state.silent {
            return None;
        }
        match &command.payload {
            CommandPayload::VerifyStock { items } => Some(if state.fail_on_verify {
                ReplyOutcome::Rejected {
                    reason: "insufficient stock".to_string(),
                    retryable: false,
                }
            } else {
                ReplyOutcome::Succeeded {
                    result: StepResult::StockVerified {
                        items_checked: items.len() as u32,
                    },
                }
            }),
            CommandPayload::ReserveStock { items } => Some(if state.fail_on_reserve {
                ReplyOutcome::Rejected {
                    reason: "insufficient stock to reserve".to_string(),
                    retryable: false,
                }
            } else {
                state.next_id += 1;
                let reservation_id = format!("RES-{:04}", state.next_id);
                state
                    .reservations
                    .insert(reservation_id.clone(), items.clone());
                ReplyOutcome::Succeeded {
                    result: StepResult::StockReserved { reservation_id },
                }
            }),
            CommandPayload::ReleaseStock { reservation_id } => Some(if state.fail_on_release {
                ReplyOutcome::Rejected {
                    reason: "stock service unavailable".to_string(),
                    retryable: true,
                }
            } else {
                state.reservations.remove(reservation_id);
                state.released += 1;
                ReplyOutcome::Succeeded {
                    result: StepResult::StockReleased {
                        reservation_id: reservation_id.clone(),
                    },
                }
            }),
            _ => None,
        }
    }
}
