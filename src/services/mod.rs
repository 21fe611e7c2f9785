//! Services - door state and movement logic
//!
//! - `registry` - Last known state of every contact sensor
//! - `observer` - Door position derived from the registry
//! - `motion` - Webhook-only motion sensors
//! - `waiter` - Enter/exit waits on sensor transitions
//! - `sequencer` - Movement sequences for each target position
//! - `action_worker` - Serial execution of door commands
//! - `scheduler` - Daily door commands

pub mod action_worker;
pub mod motion;
pub mod observer;
pub mod registry;
pub mod scheduler;
pub mod sequencer;
pub mod waiter;

pub use action_worker::{create_action_worker, ActionWorker, DoorCommand};
pub use motion::{MotionSensors, MotionUpdate};
pub use observer::PositionObserver;
pub use registry::{SensorRegistry, SensorState, SensorUpdate};
pub use scheduler::Scheduler;
pub use sequencer::{ActionReport, ActionSequencer, ActionStage, ActionTimings, SkipReason};
pub use waiter::TransitionWaiter;
