use std::panic::{self, AssertUnwindSafe};

/// Observer registered on a controller. Errors and panics stay inside the call.
pub type Callback<T> = Box<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

pub(crate) fn notify_all<T>(kind: &'static str, callbacks: &[Callback<T>], value: &T) {
    for (index, callback) in callbacks.iter().enumerate() {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(callback = kind, index, error = %format!("{err:#}"), "callback failed");
            }
            Err(_) => {
                tracing::error!(callback = kind, index, "callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn failing_callbacks_do_not_stop_the_rest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut callbacks: Vec<Callback<u32>> = Vec::new();
        callbacks.push(Box::new(|_: &u32| -> anyhow::Result<()> { anyhow::bail!("boom") }));
        callbacks.push(Box::new(|_: &u32| -> anyhow::Result<()> { panic!("callback panic") }));
        callbacks.push(Box::new(move |value: &u32| -> anyhow::Result<()> {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
            Ok(())
        }));

        notify_all("test", &callbacks, &7);
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }
}
