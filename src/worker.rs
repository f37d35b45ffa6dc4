//! Running a fit session off the calling thread.
//!
//! The worker owns the request and the model it builds; the caller keeps only the
//! interrupt flag. The solver polls the flag between iterations and returns the state
//! it reached, marked as interrupted.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::background::TougaardCache;
use crate::error::{Result, XpsFitError};
use crate::session::{run, FitConfig, FitOutcome, FitRequest};

/// Handle to a running fit.
#[derive(Debug)]
pub struct FitHandle<T> {
    interrupt: Arc<AtomicBool>,
    thread: JoinHandle<Result<T>>,
}

impl<T> FitHandle<T> {
    /// Ask the solver to stop at its next iteration
    pub fn cancel(&self) {
        debug!("Fit cancellation requested");
        self.interrupt.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the worker is done.
    ///
    /// # Errors
    ///
    /// * The session's own error, or [`XpsFitError::Worker`] if the thread panicked
    pub fn join(self) -> Result<T> {
        self.thread
            .join()
            .map_err(|_| XpsFitError::Worker("fit worker panicked".to_string()))?
    }
}

fn spawn_worker<T, F>(job: F) -> Result<FitHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(Arc<AtomicBool>) -> Result<T> + Send + 'static,
{
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    let thread = thread::Builder::new()
        .name("xpsfit-worker".to_string())
        .spawn(move || job(flag))?;
    Ok(FitHandle { interrupt, thread })
}

/// Start a session on a worker thread.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ndarray::Array1;
/// use xpsfit_rs::background::TougaardCache;
/// use xpsfit_rs::peaks::{PeakShape, PeakSpec};
/// use xpsfit_rs::session::{FitConfig, FitRequest, Mode};
/// use xpsfit_rs::worker::spawn;
///
/// let x = Array1::linspace(290.0, 280.0, 51);
/// let y = x.mapv(|v: f64| 10.0 + 100.0 * (-(v - 285.0).powi(2)).exp());
/// let request = FitRequest::new(x, y)
///     .with_peak(PeakSpec::new(PeakShape::Gaussian, 1))
///     .with_mode(Mode::Evaluate);
///
/// let handle = spawn(request, FitConfig::default(), Arc::new(TougaardCache::new())).unwrap();
/// let outcome = handle.join().unwrap();
/// assert_eq!(outcome.components.len(), 1);
/// ```
pub fn spawn(
    request: FitRequest,
    config: FitConfig,
    cache: Arc<TougaardCache>,
) -> Result<FitHandle<FitOutcome>> {
    spawn_worker(move |flag| run(&request, &config, &cache, Some(flag)))
}

/// Start a session and hand its result to `callback` on the worker thread.
pub fn spawn_with_callback<F>(
    request: FitRequest,
    config: FitConfig,
    cache: Arc<TougaardCache>,
    callback: F,
) -> Result<FitHandle<()>>
where
    F: FnOnce(Result<FitOutcome>) + Send + 'static,
{
    spawn_worker(move |flag| {
        callback(run(&request, &config, &cache, Some(flag)));
        Ok(())
    })
}
