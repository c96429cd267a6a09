pub mod dummy;
pub mod nvidia;

pub use dummy::DummySource;
pub use nvidia::NvidiaSource;
