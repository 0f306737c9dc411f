//! Error types for the MIDI engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid clock timebase: {numer}/{denom}")]
    InvalidTimebase { numer: u32, denom: u32 },

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
