use byteorder::{ByteOrder, LittleEndian};
use imu_traits::ImuError;
use tracing::{debug, trace};

pub const HEADER: u8 = 0x55;
pub const PACKET_LEN: usize = 11;

const DEFAULT_CAPACITY: usize = 512;

// Full-scale ranges of the on-board sensors.
const ACC_RANGE_G: f32 = 16.0;
const GYRO_RANGE_DPS: f32 = 2000.0;
const ANGLE_RANGE_DEG: f32 = 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Time = 0x50,
    Acceleration = 0x51,
    Gyro = 0x52,
    Angle = 0x53,
    Magnetometer = 0x54,
    Quaternion = 0x59,
}

impl FrameType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x50 => Some(FrameType::Time),
            0x51 => Some(FrameType::Acceleration),
            0x52 => Some(FrameType::Gyro),
            0x53 => Some(FrameType::Angle),
            0x54 => Some(FrameType::Magnetometer),
            0x59 => Some(FrameType::Quaternion),
            _ => None,
        }
    }
}

/// A decoded packet from the device output stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadFrame {
    /// Acceleration in g, temperature in °C.
    Acceleration { x: f32, y: f32, z: f32, temp: f32 },
    /// Angular velocity in deg/s, supply voltage in V.
    Gyro { x: f32, y: f32, z: f32, voltage: f32 },
    /// Euler angles in degrees.
    Angle { roll: f32, pitch: f32, yaw: f32, version: u16 },
    /// Raw magnetometer counts, temperature in °C.
    Magnetometer { x: f32, y: f32, z: f32, temp: f32 },
    Quaternion { w: f32, x: f32, y: f32, z: f32 },
    /// A checksummed packet of a type we do not decode.
    Other { kind: u8 },
}

pub fn checksum(packet: &[u8]) -> u8 {
    packet
        .iter()
        .take(PACKET_LEN - 1)
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn scaled(data: &[u8], offset: usize, range: f32) -> f32 {
    LittleEndian::read_i16(&data[offset..offset + 2]) as f32 / 32768.0 * range
}

fn decode(packet: &[u8]) -> ReadFrame {
    let data = &packet[2..10];
    match FrameType::from_byte(packet[1]) {
        Some(FrameType::Acceleration) => ReadFrame::Acceleration {
            x: scaled(data, 0, ACC_RANGE_G),
            y: scaled(data, 2, ACC_RANGE_G),
            z: scaled(data, 4, ACC_RANGE_G),
            temp: LittleEndian::read_i16(&data[6..8]) as f32 / 100.0,
        },
        Some(FrameType::Gyro) => ReadFrame::Gyro {
            x: scaled(data, 0, GYRO_RANGE_DPS),
            y: scaled(data, 2, GYRO_RANGE_DPS),
            z: scaled(data, 4, GYRO_RANGE_DPS),
            voltage: LittleEndian::read_i16(&data[6..8]) as f32 / 100.0,
        },
        Some(FrameType::Angle) => ReadFrame::Angle {
            roll: scaled(data, 0, ANGLE_RANGE_DEG),
            pitch: scaled(data, 2, ANGLE_RANGE_DEG),
            yaw: scaled(data, 4, ANGLE_RANGE_DEG),
            version: LittleEndian::read_u16(&data[6..8]),
        },
        Some(FrameType::Magnetometer) => ReadFrame::Magnetometer {
            x: LittleEndian::read_i16(&data[0..2]) as f32,
            y: LittleEndian::read_i16(&data[2..4]) as f32,
            z: LittleEndian::read_i16(&data[4..6]) as f32,
            temp: LittleEndian::read_i16(&data[6..8]) as f32 / 100.0,
        },
        Some(FrameType::Quaternion) => ReadFrame::Quaternion {
            w: scaled(data, 0, 1.0),
            x: scaled(data, 2, 1.0),
            y: scaled(data, 4, 1.0),
            z: scaled(data, 6, 1.0),
        },
        Some(FrameType::Time) | None => ReadFrame::Other { kind: packet[1] },
    }
}

/// Reassembles 11-byte packets from arbitrarily split serial reads.
pub struct FrameParser {
    buffer: Vec<u8>,
    capacity: usize,
    checksum_errors: u64,
}

impl FrameParser {
    pub fn new(capacity: Option<usize>) -> Self {
        let capacity = capacity.unwrap_or(DEFAULT_CAPACITY).max(PACKET_LEN);
        FrameParser {
            buffer: Vec::with_capacity(capacity),
            capacity,
            checksum_errors: 0,
        }
    }

    pub fn checksum_errors(&self) -> u64 {
        self.checksum_errors
    }

    /// Feeds `bytes` and returns every complete packet now available.
    ///
    /// Fails only when the chunk completed packets and every one of them was
    /// corrupt, which usually means the baud rate is wrong.
    pub fn parse(&mut self, bytes: &[u8]) -> Result<Vec<ReadFrame>, ImuError> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > self.capacity {
            let excess = self.buffer.len() - self.capacity;
            trace!("Frame buffer full, dropping {} stale bytes", excess);
            self.buffer.drain(..excess);
        }

        let mut frames = Vec::new();
        let mut corrupt = 0u64;
        let mut pos = 0;
        while pos + PACKET_LEN <= self.buffer.len() {
            if self.buffer[pos] != HEADER {
                pos += 1;
                continue;
            }
            let packet = &self.buffer[pos..pos + PACKET_LEN];
            if checksum(packet) != packet[PACKET_LEN - 1] {
                corrupt += 1;
                pos += 1;
                continue;
            }
            frames.push(decode(packet));
            pos += PACKET_LEN;
        }
        self.buffer.drain(..pos);

        if corrupt > 0 {
            self.checksum_errors += corrupt;
            debug!("Dropped {} packets with bad checksums", corrupt);
            if frames.is_empty() {
                return Err(ImuError::InvalidPacket(format!(
                    "{} checksum mismatches and no valid packets",
                    corrupt
                )));
            }
        }
        Ok(frames)
    }
}
