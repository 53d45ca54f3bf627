//! Transaction submission, receipt resolution and intent signing

mod resolver;
mod retry;
mod signer;

pub use resolver::{Resolution, SubmissionResolver};
pub use retry::{Backoff, RetryPolicy};
pub use signer::{TransactionSigner, TransferIntent, WalletSigner};

#[cfg(test)]
pub use resolver::UnconfirmedReason;
#[cfg(test)]
pub use signer::MockTransactionSigner;
