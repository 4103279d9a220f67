pub mod frame;
pub mod modem;
pub mod symbol;

pub use frame::{FrameError, MAX_PAYLOAD_LEN};
pub use modem::{Demodulator, Modulator};
pub use symbol::SAMPLE_RATE;
