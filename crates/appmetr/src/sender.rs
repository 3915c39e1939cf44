use crate::error::SendError;

/// Transport for encoded batches.
///
/// `Ok(true)` means the endpoint accepted the batch. `Ok(false)` is a transient failure
/// the uploader retries or drops according to its policy. `Err` means the batch can never
/// be delivered by this sender and stops the uploader.
pub trait BatchSender: Send + Sync {
    fn send(&self, url: &str, token: &str, batch: &[u8]) -> Result<bool, SendError>;
}

impl<F> BatchSender for F
where
    F: Fn(&str, &str, &[u8]) -> Result<bool, SendError> + Send + Sync,
{
    fn send(&self, url: &str, token: &str, batch: &[u8]) -> Result<bool, SendError> {
        self(url, token, batch)
    }
}
