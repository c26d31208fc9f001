use flate2::write::GzEncoder;
use std::io::{Error, Write};

/// Stream writers that must be closed explicitly to flush their trailer.
pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for GzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        GzEncoder::finish(self)
    }
}

impl<W: Write> Finish<W> for tar::Builder<W> {
    fn finish(self) -> Result<W, Error> {
        self.into_inner()
    }
}
