//! Transaction registry.
//!
//! Issues transaction ids and tracks one pending completion per id. The
//! receive loop resolves completions as responses arrive; data phase
//! packets are accumulated against the same id and handed over with the
//! response.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::client::ClientError;
use crate::protocol::{INITIAL_TRANSACTION_ID, OperationResponse, TransactionId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Transaction {0} already has a pending completion")]
    AlreadyPending(TransactionId),
    #[error("A response-any completion is already pending")]
    AnyResponseAlreadyPending,
}

/// A finished transaction: the response plus any data phase payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub response: OperationResponse,
    pub data: Option<Vec<u8>>,
}

pub type CompletionResult = Result<Completion, ClientError>;

/// Receiving half handed to the caller on registration.
pub type CompletionReceiver = oneshot::Receiver<CompletionResult>;

struct Pending {
    tx: oneshot::Sender<CompletionResult>,
    data: Option<Vec<u8>>,
}

/// Counter plus pending completions for one connection.
pub struct TransactionRegistry {
    counter: TransactionId,
    pending: HashMap<TransactionId, Pending>,
    any_response: Option<oneshot::Sender<CompletionResult>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::starting_at(INITIAL_TRANSACTION_ID)
    }

    pub fn starting_at(first: TransactionId) -> Self {
        Self {
            counter: first,
            pending: HashMap::new(),
            any_response: None,
        }
    }

    /// Return the current counter value, then advance it.
    pub fn next_id(&mut self) -> TransactionId {
        let id = self.counter;
        self.counter = self.counter.wrapping_add(1);
        id
    }

    /// Value the next `next_id` call will return.
    pub fn peek_id(&self) -> TransactionId {
        self.counter
    }

    /// Overwrite the counter. Monotonicity does not hold across a reset.
    pub fn reset(&mut self, to: TransactionId) {
        debug!(from = self.counter, to, "Transaction counter reset");
        self.counter = to;
    }

    /// Register the single completion for `id`.
    ///
    /// A second registration for a pending id is rejected and the first one
    /// is left untouched.
    pub fn register(&mut self, id: TransactionId) -> Result<CompletionReceiver, RegistryError> {
        if self.pending.contains_key(&id) {
            return Err(RegistryError::AlreadyPending(id));
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending { tx, data: None });
        trace!(transaction_id = id, pending = self.pending.len(), "Registered completion");
        Ok(rx)
    }

    /// Register a completion for the next response regardless of its id.
    pub fn register_any(&mut self) -> Result<CompletionReceiver, RegistryError> {
        if self.any_response.is_some() {
            return Err(RegistryError::AnyResponseAlreadyPending);
        }
        let (tx, rx) = oneshot::channel();
        self.any_response = Some(tx);
        Ok(rx)
    }

    /// Start of a data phase. Returns false for a stray id.
    pub fn begin_data(&mut self, id: TransactionId, total_length: u64) -> bool {
        match self.pending.get_mut(&id) {
            Some(pending) => {
                let capacity = total_length.min(16 * 1024 * 1024) as usize;
                pending.data = Some(Vec::with_capacity(capacity));
                true
            }
            None => {
                debug!(transaction_id = id, "Dropping stray StartData");
                false
            }
        }
    }

    /// Append a data chunk. Returns false for a stray id.
    pub fn append_data(&mut self, id: TransactionId, payload: &[u8]) -> bool {
        match self.pending.get_mut(&id) {
            Some(pending) => {
                pending
                    .data
                    .get_or_insert_with(Vec::new)
                    .extend_from_slice(payload);
                true
            }
            None => {
                debug!(transaction_id = id, len = payload.len(), "Dropping stray data");
                false
            }
        }
    }

    /// Complete the transaction named by the response.
    ///
    /// A pending response-any completion takes the response first. A
    /// response for an unknown id is a stray or late packet and is dropped.
    pub fn resolve(&mut self, response: OperationResponse) -> bool {
        if let Some(tx) = self.any_response.take() {
            let data = self
                .pending
                .get_mut(&response.transaction_id)
                .and_then(|p| p.data.take());
            let _ = tx.send(Ok(Completion { response, data }));
            return true;
        }

        match self.pending.remove(&response.transaction_id) {
            Some(pending) => {
                trace!(transaction_id = response.transaction_id, code = %response.code, "Resolved");
                // Receiver may have timed out and gone away.
                let _ = pending.tx.send(Ok(Completion {
                    response,
                    data: pending.data,
                }));
                true
            }
            None => {
                debug!(transaction_id = response.transaction_id, code = %response.code, "Dropping stray response");
                false
            }
        }
    }

    /// Fail the completion for `id`.
    pub fn fail(&mut self, id: TransactionId, error: ClientError) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                let _ = pending.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail whichever completion a malformed response was meant for.
    ///
    /// Same precedence as `resolve`: a pending response-any completion
    /// first, then the transaction named by `id` if it could be read.
    pub fn fail_response(&mut self, id: Option<TransactionId>, error: ClientError) -> bool {
        if let Some(tx) = self.any_response.take() {
            let _ = tx.send(Err(error));
            return true;
        }
        match id {
            Some(id) => self.fail(id, error),
            None => false,
        }
    }

    /// Drop the registration for `id` without invoking it.
    pub fn cancel(&mut self, id: TransactionId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn cancel_any(&mut self) {
        self.any_response = None;
    }

    /// Fail every pending completion, used when the connection goes away.
    pub fn fail_all(&mut self, error: &ClientError) {
        if let Some(tx) = self.any_response.take() {
            let _ = tx.send(Err(error.clone()));
        }
        for (_, pending) in self.pending.drain() {
            let _ = pending.tx.send(Err(error.clone()));
        }
    }

    pub fn is_pending(&self, id: TransactionId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseCode;
    use crate::transport::DisconnectReason;

    fn ok(id: TransactionId) -> OperationResponse {
        OperationResponse::new(ResponseCode::OK, id)
    }

    #[test]
    fn test_next_id_strictly_increasing() {
        let mut registry = TransactionRegistry::new();
        let ids: Vec<_> = (0..5).map(|_| registry.next_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_reset_sets_next_value() {
        let mut registry = TransactionRegistry::new();
        for _ in 0..4 {
            registry.next_id();
        }
        registry.reset(1);
        assert_eq!(registry.next_id(), 1);
        assert_eq!(registry.next_id(), 2);
    }

    #[test]
    fn test_double_registration_keeps_first() {
        let mut registry = TransactionRegistry::new();
        let mut first = registry.register(7).unwrap();
        assert_eq!(registry.register(7).unwrap_err(), RegistryError::AlreadyPending(7));

        assert!(registry.resolve(ok(7)));
        let completion = first.try_recv().unwrap().unwrap();
        assert_eq!(completion.response.transaction_id, 7);
    }

    #[test]
    fn test_resolve_unregistered_is_noop() {
        let mut registry = TransactionRegistry::new();
        let mut rx = registry.register(2).unwrap();
        assert!(!registry.resolve(ok(9)));
        assert_eq!(registry.pending_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_data_is_delivered_with_response() {
        let mut registry = TransactionRegistry::new();
        let mut rx = registry.register(3).unwrap();
        assert!(registry.begin_data(3, 4));
        assert!(registry.append_data(3, &[1, 2]));
        assert!(registry.append_data(3, &[3, 4]));
        assert!(!registry.append_data(4, &[9]));
        registry.resolve(ok(3));
        let completion = rx.try_recv().unwrap().unwrap();
        assert_eq!(completion.data, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_correlation_ignores_arrival_order() {
        let mut registry = TransactionRegistry::new();
        let mut first = registry.register(10).unwrap();
        let mut second = registry.register(11).unwrap();

        registry.begin_data(10, 2);
        registry.begin_data(11, 2);
        registry.append_data(11, &[0xB1]);
        registry.append_data(10, &[0xA1]);
        registry.append_data(11, &[0xB2]);
        registry.append_data(10, &[0xA2]);

        assert!(registry.resolve(ok(11)));
        assert!(first.try_recv().is_err());
        assert!(registry.resolve(ok(10)));

        let second = second.try_recv().unwrap().unwrap();
        assert_eq!(second.response.transaction_id, 11);
        assert_eq!(second.data, Some(vec![0xB1, 0xB2]));
        let first = first.try_recv().unwrap().unwrap();
        assert_eq!(first.response.transaction_id, 10);
        assert_eq!(first.data, Some(vec![0xA1, 0xA2]));
    }

    #[test]
    fn test_fail_response_prefers_any_slot() {
        let mut registry = TransactionRegistry::new();
        let mut any = registry.register_any().unwrap();
        let mut named = registry.register(4).unwrap();
        let error = ClientError::Decode(crate::protocol::DecodeError::MalformedPayload("bad".into()));

        assert!(registry.fail_response(Some(4), error.clone()));
        assert!(matches!(any.try_recv().unwrap(), Err(ClientError::Decode(_))));
        assert!(named.try_recv().is_err());

        assert!(registry.fail_response(Some(4), error.clone()));
        assert!(matches!(named.try_recv().unwrap(), Err(ClientError::Decode(_))));
        assert!(!registry.fail_response(None, error));
    }

    #[test]
    fn test_any_response_takes_first_response() {
        let mut registry = TransactionRegistry::new();
        let mut rx = registry.register_any().unwrap();
        assert!(registry.resolve(ok(0x55)));
        assert_eq!(rx.try_recv().unwrap().unwrap().response.transaction_id, 0x55);
        // Slot is consumed; the next response is stray.
        assert!(!registry.resolve(ok(0x56)));
    }

    #[test]
    fn test_cancel_removes_registration() {
        let mut registry = TransactionRegistry::new();
        let _rx = registry.register(5).unwrap();
        assert!(registry.cancel(5));
        assert!(!registry.is_pending(5));
        assert!(!registry.resolve(ok(5)));
    }

    #[test]
    fn test_fail_all_resolves_everything_once() {
        let mut registry = TransactionRegistry::new();
        let mut a = registry.register(1).unwrap();
        let mut b = registry.register(2).unwrap();
        registry.fail_all(&ClientError::Disconnected(DisconnectReason::Closed));
        assert!(matches!(a.try_recv().unwrap(), Err(ClientError::Disconnected(_))));
        assert!(matches!(b.try_recv().unwrap(), Err(ClientError::Disconnected(_))));
        assert_eq!(registry.pending_count(), 0);
    }
}
