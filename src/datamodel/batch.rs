use super::NotificationRecord;
use bytes::Bytes;
use std::fmt;

/// Opaque token tied to one queue delivery. Only the holder may delete the
/// delivery, and only until its visibility window lapses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle(String);

impl MessageHandle {
    pub fn new(receipt: impl Into<String>) -> Self {
        Self(receipt.into())
    }

    pub fn receipt(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw envelope as delivered by the queue, with the handle needed to delete it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Bytes,
    pub handle: MessageHandle,
}

impl Delivery {
    pub fn new(envelope: impl Into<Bytes>, handle: MessageHandle) -> Self {
        Self {
            envelope: envelope.into(),
            handle,
        }
    }
}

/// Records collected during one invocation.
///
/// The record at index `i` was decoded from the delivery whose handle sits at
/// index `i`. Both sequences only grow together through [`Batch::push`].
#[derive(Debug, Default, Clone)]
pub struct Batch {
    records: Vec<NotificationRecord>,
    handles: Vec<MessageHandle>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: NotificationRecord, handle: MessageHandle) {
        self.records.push(record);
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn handles(&self) -> &[MessageHandle] {
        &self.handles
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NotificationRecord, &MessageHandle)> {
        self.records.iter().zip(self.handles.iter())
    }

    pub fn into_handles(self) -> Vec<MessageHandle> {
        self.handles
    }
}

impl FromIterator<(NotificationRecord, MessageHandle)> for Batch {
    fn from_iter<I: IntoIterator<Item = (NotificationRecord, MessageHandle)>>(iter: I) -> Self {
        let mut batch = Batch::new();
        for (record, handle) in iter {
            batch.push(record, handle);
        }
        batch
    }
}
