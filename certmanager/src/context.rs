use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Deadline for the network calls of one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
	deadline: Option<Instant>,
}

impl Context {
	/// No deadline.
	pub fn background() -> Self {
		Self::default()
	}

	/// Deadline `timeout` from now.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self::with_deadline(Instant::now() + timeout)
	}

	/// Deadline at `deadline`.
	pub fn with_deadline(deadline: Instant) -> Self {
		Self {
			deadline: Some(deadline),
		}
	}

	/// Run `fut` to completion, or fail with [`Error::DeadlineExceeded`] once the deadline passes.
	pub async fn run<T, F>(&self, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		match self.deadline {
			Some(deadline) => tokio::time::timeout_at(deadline, fut)
				.await
				.map_err(|_| Error::DeadlineExceeded)?,
			None => fut.await,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ErrorKind;

	#[tokio::test(start_paused = true)]
	async fn deadline_expires() {
		let ctx = Context::with_timeout(Duration::from_secs(10));
		let err = ctx
			.run(std::future::pending::<Result<()>>())
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
	}

	#[tokio::test]
	async fn completes_in_time() {
		let ctx = Context::with_timeout(Duration::from_secs(10));
		assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
		assert_eq!(Context::background().run(async { Ok(8) }).await.unwrap(), 8);
	}

	#[tokio::test]
	async fn inner_error_passes_through() {
		let ctx = Context::with_timeout(Duration::from_secs(10));
		let err = ctx
			.run(async { Err::<(), _>(Error::NotFound("x".into())) })
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NotFound);
	}
}
