pub mod config;
pub mod debounce;
pub mod display;
pub mod error;
pub mod mapping;
pub mod registry;
pub mod reward;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod timing;
pub mod topics;
pub mod types;

pub use config::{LedLayout, MachineConfig, NetworkConfig, Preferences, RuntimeConfig};
pub use debounce::{InputDebouncer, PinLevel, TouchSensor};
pub use display::DisplayController;
pub use error::{PayloadError, RegistryError, StoreError};
pub use registry::{DeviceRegistry, DeviceSnapshot};
pub use reward::{RewardController, SaveTrigger};
pub use scheduler::{MachineContext, ModeScheduler, TickInputs};
pub use store::{Document, DocumentStore, MemoryDocumentStore, StructuredQuery};
pub use sync::DocumentPaths;
pub use telemetry::{parse_sensor_message, EnergyReading, SensorMessage, TelemetryPayload};
pub use topics::*;
pub use types::{MachineAction, MachineStatus, MotorDirection, OperatingMode, RewardPhase, Rgb};
