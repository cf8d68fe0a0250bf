//! Serial line opening for Modbus RTU

use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use crate::error::Result;
use crate::model::{Parity, SerialSettings};

fn data_bits(bytesize: u8) -> tokio_serial::DataBits {
    match bytesize {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn stop_bits(stopbits: u8) -> tokio_serial::StopBits {
    match stopbits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

/// Open the port described by `settings` in async mode
pub fn open(settings: &SerialSettings) -> Result<SerialStream> {
    settings.validate()?;
    debug!(
        "Opening serial port {} @ {} {}{:?}{}",
        settings.port, settings.baudrate, settings.bytesize, settings.parity, settings.stopbits
    );

    let stream = tokio_serial::new(&settings.port, settings.baudrate)
        .data_bits(data_bits(settings.bytesize))
        .parity(parity(settings.parity))
        .stop_bits(stop_bits(settings.stopbits))
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()?;
    Ok(stream)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_line_parameter_mapping() {
        assert_eq!(data_bits(7), tokio_serial::DataBits::Seven);
        assert_eq!(data_bits(8), tokio_serial::DataBits::Eight);
        assert_eq!(stop_bits(2), tokio_serial::StopBits::Two);
        assert_eq!(stop_bits(1), tokio_serial::StopBits::One);
        assert_eq!(parity(Parity::Even), tokio_serial::Parity::Even);
    }

    #[test]
    fn test_open_rejects_invalid_settings() {
        let settings = SerialSettings {
            baudrate: 0,
            ..SerialSettings::default()
        };
        assert!(open(&settings).unwrap_err().is_config());
    }
}
