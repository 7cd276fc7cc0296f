use embedded_hal::i2c::{Error, ErrorKind, NoAcknowledgeSource, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DummyError {
    InvalidTest,
    Nack,
}

impl Error for DummyError {
    fn kind(&self) -> ErrorKind {
        match self {
            DummyError::InvalidTest => ErrorKind::Other,
            DummyError::Nack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
        }
    }
}

/// Scripted bus: records every write and serves the queued read responses
/// in order. Reads past the end of the script fail the test.
pub struct DummyBus<'a> {
    responses: &'a [&'a [u8]],
    cursor: usize,
    pub writes: Vec<Vec<u8>>,
    nack_writes: bool,
}

impl<'a> DummyBus<'a> {
    pub fn new(responses: &'a [&'a [u8]]) -> Self {
        Self {
            responses,
            cursor: 0,
            writes: Vec::new(),
            nack_writes: false,
        }
    }

    /// A bus on which every write is NACKed.
    pub fn nacking() -> Self {
        Self {
            nack_writes: true,
            ..Self::new(&[])
        }
    }

    fn run(&mut self, operations: &mut [Operation]) -> Result<(), DummyError> {
        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    if self.nack_writes {
                        return Err(DummyError::Nack);
                    }

                    self.writes.push(bytes.to_vec());
                }
                Operation::Read(buffer) => {
                    let Some(response) = self.responses.get(self.cursor) else {
                        return Err(DummyError::InvalidTest);
                    };
                    self.cursor += 1;

                    if buffer.len() != response.len() {
                        return Err(DummyError::InvalidTest);
                    }

                    buffer.copy_from_slice(response);
                }
            }
        }

        Ok(())
    }
}

impl embedded_hal::i2c::ErrorType for DummyBus<'_> {
    type Error = DummyError;
}

impl embedded_hal::i2c::I2c for DummyBus<'_> {
    fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation],
    ) -> Result<(), Self::Error> {
        self.run(operations)
    }
}

impl embedded_hal_async::i2c::I2c for DummyBus<'_> {
    async fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run(operations)
    }
}

/// Delay provider that records every requested delay instead of sleeping.
#[derive(Debug, Default)]
pub struct DummyDelay {
    pub delays_ns: Vec<u32>,
}

impl embedded_hal::delay::DelayNs for DummyDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.delays_ns.push(ns);
    }
}

impl embedded_hal_async::delay::DelayNs for DummyDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.delays_ns.push(ns);
    }
}
