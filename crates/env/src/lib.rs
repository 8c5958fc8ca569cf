//! Episodic control of browser games running in disposable Chrome sandboxes.
//!
//! An [`Env`] starts a container (or attaches to an existing Chrome), loads a
//! game page exposing the `window.muniverse` adapter, and drives it through
//! reset, step and observe calls over the DevTools protocol.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use pixelgym_env::{Env, EnvOptions, EnvSpec, KeyEvent};
//!
//! let spec = EnvSpec::new("Knot-v0", 84, 84).with_keys(["ArrowLeft", "ArrowRight"]);
//! let mut env = Env::new(&spec, EnvOptions::default()).await?;
//! env.reset().await?;
//! let outcome = env
//!     .step(Duration::from_millis(100), &[KeyEvent::down("ArrowLeft").into()])
//!     .await?;
//! let frame = env.observe().await?.to_rgb()?;
//! env.close().await?;
//! ```

pub mod capture;
pub mod cdp;
pub mod env;
pub mod error;
pub mod establish;
pub mod event;
pub mod liveness;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod observation;
pub mod options;
pub mod provision;
pub mod runtime;
pub mod session;
pub mod spec;
pub mod teardown;

#[cfg(test)]
pub(crate) mod fakes;

pub use {
    capture::CaptureStrategy,
    env::{Env, EpisodeState, StepOutcome},
    error::{EnvError, ErrorKind, Result},
    event::{InputEvent, KeyEvent, PointerEvent, TouchEvent},
    observation::{Observation, ObservationKind, RgbFrame},
    options::EnvOptions,
    runtime::{CliGuard, DockerCli},
    spec::{EnvSpec, SpecCatalog},
};
