//! Join-ticket verification.

use crate::config::AccountConfig;
use std::collections::HashMap;

/// Decides whether a join's ticket authenticates its declared user id.
pub trait TicketVerifier: Send + Sync {
    fn verify(&self, user_id: &str, ticket: &str) -> bool;
}

/// Fixed tickets, one per configured account.
#[derive(Debug, Clone, Default)]
pub struct StaticTickets {
    tickets: HashMap<String, String>,
}

impl StaticTickets {
    pub fn from_accounts(accounts: &[AccountConfig]) -> Self {
        Self {
            tickets: accounts
                .iter()
                .filter(|a| !a.ticket.is_empty())
                .map(|a| (a.user_id.clone(), a.ticket.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl TicketVerifier for StaticTickets {
    fn verify(&self, user_id: &str, ticket: &str) -> bool {
        let Some(expected) = self.tickets.get(user_id) else {
            return false;
        };
        // Compare every byte regardless of where the first mismatch is.
        expected.len() == ticket.len()
            && expected
                .bytes()
                .zip(ticket.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}
