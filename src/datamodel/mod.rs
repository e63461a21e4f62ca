pub mod batch;
pub mod digest;
pub mod digest_datetime;
pub mod notification_record;

pub use batch::{Batch, Delivery, MessageHandle};
pub use digest::{ArtifactLocator, DIGEST_SUBJECT, DigestArtifact, DigestFormat, DigestNotification};
pub use digest_datetime::{DigestDateTime, DigestDateTimeExt};
pub use notification_record::{NotificationRecord, Payload};
