//! Serial adapter

use async_trait::async_trait;
use tokio_serial::{DataBits, SerialPortBuilderExt, StopBits};

use super::TransportAdapter;
use crate::channel::RawLink;
use crate::config::{Parity, SerialSettings};
use crate::error::TransportError;
use crate::port::Session;

/// Opens one serial device per enable
pub struct SerialAdapter {
    id: String,
    settings: SerialSettings,
}

impl SerialAdapter {
    /// Adapter for the port `id`
    pub fn new(id: String, settings: SerialSettings) -> Self {
        Self { id, settings }
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> StopBits {
    if bits == 2 {
        StopBits::Two
    } else {
        StopBits::One
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

#[async_trait]
impl TransportAdapter for SerialAdapter {
    async fn open(&self, session: Session) -> Result<(), TransportError> {
        let s = &self.settings;
        tracing::debug!(
            port = %self.id,
            device = %s.device,
            baud_rate = s.baud_rate,
            "Opening serial device"
        );

        let stream = tokio_serial::new(&s.device, s.baud_rate)
            .parity(parity(s.parity))
            .stop_bits(stop_bits(s.stop_bits))
            .data_bits(data_bits(s.data_bits))
            .timeout(s.write_timeout)
            .open_native_async()?;

        let link = RawLink::new(self.id.clone(), stream)
            .critical()
            .with_write_buffer(s.write_buffer_size)
            .with_write_timeout(s.write_timeout);
        if !session.attach(link) {
            return Err(TransportError::Cancelled);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The device handle is owned by the link, which closes with its session
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{recording_session, RecordingSink};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_line_settings_mapping() {
        assert_eq!(data_bits(7), DataBits::Seven);
        assert_eq!(stop_bits(2), StopBits::Two);
        assert_eq!(parity(Parity::Even), tokio_serial::Parity::Even);
    }

    #[tokio::test]
    async fn test_missing_device_fails_open() {
        let adapter = SerialAdapter::new(
            "serial:/dev/ports-test-missing".into(),
            SerialSettings {
                device: "/dev/ports-test-missing".into(),
                baud_rate: 57_600,
                parity: Parity::None,
                stop_bits: 1,
                data_bits: 8,
                write_timeout: Duration::from_millis(200),
                write_buffer_size: 1024,
            },
        );
        let sink = Arc::new(RecordingSink::default());
        let result = adapter.open(recording_session(&sink)).await;
        assert!(matches!(result, Err(TransportError::Serial(_))));
        assert!(sink.links.lock().is_empty());
    }
}
