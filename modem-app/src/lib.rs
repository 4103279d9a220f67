pub mod audio;
pub mod demodulator;
pub mod error;
pub mod modulator;
pub mod packet_io;
pub mod supervisor;

pub use error::AppError;
pub use supervisor::{Config, Mode};
