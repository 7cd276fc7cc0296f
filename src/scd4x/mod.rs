use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, error};

use crate::sensirion::{Error, Sensor};

pub mod asynch;
pub mod commands;
mod sample;

use commands::Command;
pub use sample::{Attribute, Channel, RawSample, Sample, Value};

pub(crate) const ADDR: u8 = 0x62;

/// Periodic sampling mode requested at [`Scd4x::init`] time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementMode {
    /// Signal update interval of 5 seconds.
    #[default]
    Periodic,
    /// Signal update interval of roughly 30 seconds.
    LowPowerPeriodic,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub mode: MeasurementMode,
}

/// Whether periodic measurement is known to be running. The device may
/// still be measuring from a previous session, so a fresh handle starts
/// out as `Stopped` until `init` forces a known state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MeasurementState {
    Stopped,
    Running,
}

pub struct Scd4x<I2C, D> {
    sensor: Sensor<I2C, D>,
    config: Config,
    state: MeasurementState,
    sample: Sample,
}

impl<I2C: I2c, D: DelayNs> Scd4x<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self::with_config(i2c, delay, Config::default())
    }

    pub fn with_config(i2c: I2C, delay: D, config: Config) -> Self {
        Self {
            sensor: Sensor::new(i2c, delay, ADDR),
            config,
            state: MeasurementState::Stopped,
            sample: Sample::default(),
        }
    }

    fn command(&mut self, command: Command) -> Result<(), Error<I2C::Error>> {
        self.sensor
            .exchange(command.code(), &[], command.settle_delay_ms(), &mut [])
    }

    fn query<const N: usize>(&mut self, command: Command) -> Result<[u16; N], Error<I2C::Error>> {
        debug_assert_eq!(N, command.response_words());

        let mut words = [0u16; N];
        self.sensor
            .exchange(command.code(), &[], command.settle_delay_ms(), &mut words)?;

        Ok(words)
    }

    /// Brings the device into a known state and starts periodic measurement
    /// in the configured mode.
    ///
    /// Stop is valid whether or not the device is measuring, so it is issued
    /// unconditionally; the sensor takes 500 ms to quiesce before it accepts
    /// the start command. If the stop write fails, start is not attempted.
    pub fn init(&mut self) -> Result<(), Error<I2C::Error>> {
        self.state = MeasurementState::Stopped;

        debug!("stopping periodic measurement");
        self.command(Command::StopPeriodicMeasurement).map_err(|e| {
            error!("failed to stop periodic measurement");
            e
        })?;

        debug!("starting periodic measurement");
        let start = match self.config.mode {
            MeasurementMode::Periodic => Command::StartPeriodicMeasurement,
            MeasurementMode::LowPowerPeriodic => Command::StartLowPowerPeriodicMeasurement,
        };
        self.command(start).map_err(|e| {
            error!("failed to start periodic measurement");
            e
        })?;

        self.state = MeasurementState::Running;
        Ok(())
    }

    /// Polls the sensor for whether data from a periodic measurement is
    /// ready to be read out. The low 10 bits of the status word are zero
    /// while no unread sample is available.
    pub fn get_data_ready_status(&mut self) -> Result<bool, Error<I2C::Error>> {
        let [status] = self.query::<1>(Command::GetDataReadyStatus)?;

        Ok(status & 0x03ff != 0)
    }

    /// Reads the 48-bit serial number identifying the chip.
    pub fn get_serial_number(&mut self) -> Result<u64, Error<I2C::Error>> {
        let words = self.query::<3>(Command::GetSerialNumber)?;

        Ok((words[0] as u64) << 32 | (words[1] as u64) << 16 | (words[2] as u64))
    }

    fn read_measurement(&mut self) -> Result<RawSample, Error<I2C::Error>> {
        let words = self.query::<3>(Command::ReadMeasurement)?;

        Ok(RawSample {
            co2: words[0],
            temperature: words[1],
            humidity: words[2],
        })
    }

    /// Fetches the next sample into the handle's cache.
    ///
    /// Only valid while periodic measurement is running. If the sensor has
    /// no unread sample yet this fails with [`Error::NotReady`] without
    /// touching the bus further; the cached sample is only overwritten on
    /// success.
    pub fn fetch_sample(&mut self) -> Result<(), Error<I2C::Error>> {
        if self.state != MeasurementState::Running {
            return Err(Error::NotRunning);
        }

        if !self.get_data_ready_status()? {
            return Err(Error::NotReady);
        }

        let raw = self.read_measurement()?;
        self.sample = Sample::from_raw(raw);

        Ok(())
    }

    /// Returns the given channel of the last successfully fetched sample.
    /// Reads all-zero until the first fetch succeeds.
    pub fn channel_get(&self, channel: Channel) -> Value {
        self.sample.value(channel)
    }

    /// Reads a per-channel attribute. Only the CO2 channel's serial number
    /// is covered; every other pair fails with [`Error::Unsupported`].
    pub fn attribute_get(
        &mut self,
        channel: Channel,
        attribute: Attribute,
    ) -> Result<u64, Error<I2C::Error>> {
        match (channel, attribute) {
            (Channel::Co2, Attribute::SerialNumber) => self.get_serial_number(),
            _ => Err(Error::Unsupported),
        }
    }

    /// Sets the ambient pressure used for on-chip compensation, in hPa.
    /// Takes effect from the next measurement.
    pub fn set_ambient_pressure(&mut self, hectopascal: u16) -> Result<(), Error<I2C::Error>> {
        let command = Command::SetAmbientPressure;
        self.sensor.exchange(
            command.code(),
            &[hectopascal],
            command.settle_delay_ms(),
            &mut [],
        )
    }
}
