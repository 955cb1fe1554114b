//! Failure isolation for user callbacks.
//!
//! Listeners and message handlers run on the transport's task. A callback that
//! returns an error or panics must not take the reader down with it, so every
//! invocation goes through [`invoke_isolated`].

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use wyb_core::errors::ClientError;

/// Run `f`, converting an error return or a panic into
/// [`ClientError::Handler`] tagged with `target`.
pub(crate) fn invoke_isolated<F>(target: &str, f: F) -> Result<(), ClientError>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ClientError::Handler {
            target: target.to_string(),
            message: format!("{err:#}"),
        }),
        Err(payload) => Err(ClientError::Handler {
            target: target.to_string(),
            message: format!("panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn ok_passes_through() {
        assert!(invoke_isolated("connect", || Ok(())).is_ok());
    }

    #[test]
    fn error_becomes_handler_error() {
        let err = invoke_isolated("client_list", || anyhow::bail!("bad payload")).unwrap_err();
        assert_matches!(
            err,
            ClientError::Handler { ref target, ref message }
                if target == "client_list" && message == "bad payload"
        );
    }

    #[test]
    fn panic_is_caught() {
        let err = invoke_isolated("message", || panic!("listener exploded")).unwrap_err();
        assert_matches!(
            err,
            ClientError::Handler { ref message, .. } if message.contains("listener exploded")
        );
    }

    #[test]
    fn formatted_panic_is_caught() {
        let code = 7;
        let err = invoke_isolated("message", || panic!("code {code}")).unwrap_err();
        assert_matches!(err, ClientError::Handler { ref message, .. } if message.contains("code 7"));
    }
}
