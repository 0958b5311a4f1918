pub mod relay;
pub mod system;
