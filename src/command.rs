//! ACD1100 command definitions.

/// Concentration of fresh outdoor air, the usual manual calibration target.
pub const DEFAULT_CALIBRATION_PPM: u16 = 450;

/// Commands understood by the sensor on the I2C interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2cCommand {
    /// Read CO₂ concentration and temperature.
    ReadMeasurement,
    /// Get or set the calibration mode (automatic or manual).
    CalibrationMode,
    /// Calibrate to a known CO₂ concentration.
    ManualCalibration,
    /// Restore the factory calibration.
    FactoryReset,
    /// Read the firmware version string.
    SoftwareVersion,
    /// Read the sensor's identification string.
    SensorId,
}

impl I2cCommand {
    /// Command pair (high, low) sent at the start of every I2C write.
    pub fn code(&self) -> [u8; 2] {
        match self {
            Self::ReadMeasurement => [0x03, 0x00],
            Self::CalibrationMode => [0x53, 0x06],
            Self::ManualCalibration => [0x52, 0x04],
            Self::FactoryReset => [0x52, 0x02],
            Self::SoftwareVersion => [0xd1, 0x00],
            Self::SensorId => [0xd2, 0x01],
        }
    }

    /// Length of the sensor's reply to this command.
    pub fn response_len(&self) -> usize {
        match self {
            Self::ReadMeasurement => 10,
            Self::CalibrationMode | Self::ManualCalibration | Self::FactoryReset => 4,
            Self::SoftwareVersion | Self::SensorId => 11,
        }
    }
}

/// Commands understood by the sensor on the UART interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UartCommand {
    /// Read CO₂ concentration and temperature.
    ReadMeasurement,
}

impl UartCommand {
    /// Op code used for the command in communication with the sensor.
    pub fn op_code(&self) -> u8 {
        match self {
            Self::ReadMeasurement => 0x01,
        }
    }
}

/// Calibration mode of the sensor's baseline correction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationMode {
    /// The sensor corrects its baseline on its own.
    Automatic,
    /// Baseline only changes through [`I2cCommand::ManualCalibration`].
    Manual,
}

impl CalibrationMode {
    pub(crate) fn flag(&self) -> u8 {
        match self {
            Self::Automatic => 0x01,
            Self::Manual => 0x00,
        }
    }

    pub(crate) fn from_flag(flag: u8) -> Self {
        if flag == 0x01 {
            Self::Automatic
        } else {
            Self::Manual
        }
    }
}
