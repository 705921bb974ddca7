pub mod device;
pub mod events;
pub mod settings;
pub mod update;

pub use device::*;
pub use events::*;
pub use settings::*;
pub use update::*;
