//! Vendor request protocol spoken over the control endpoint
//!
//! Every request is an 8-byte SETUP packet:
//!
//! | byte | field         | use                                   |
//! |------|---------------|---------------------------------------|
//! | 0    | bmRequestType | bit 7 set for device-to-host reads    |
//! | 1    | bRequest      | opcode or read region                 |
//! | 2..4 | wValue        | data word for `fill`                  |
//! | 4..6 | wIndex        | flash byte address / read offset      |
//! | 6..8 | wLength       | read length                           |
//!
//! With the integrity check enabled every packet is validated including the
//! two CRC bytes the driver leaves behind it.

pub mod crc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    ShortPacket,
    InvalidChecksum,
}

pub type Result<T> = core::result::Result<T, ProtocolError>;

/// Length of a SETUP packet without CRC
pub const SETUP_LEN: usize = 8;

/// Host-to-device flash opcodes; the values are the SPM command bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Fill = 1,
    Erase = 3,
    Write = 5,
    Exit = 128,
}

impl Opcode {
    pub fn from_request(request: u8) -> Option<Self> {
        match request {
            1 => Some(Opcode::Fill),
            3 => Some(Opcode::Erase),
            5 => Some(Opcode::Write),
            128 => Some(Opcode::Exit),
            _ => None,
        }
    }
}

/// Device-to-host read regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Region {
    /// Data space: registers, I/O and SRAM
    Ram = 0x00,
    Flash = 0x01,
    Config = 0x02,
    Fuse = 0x09,
    Signature = 0x21,
    Eeprom = 0x40,
}

impl Region {
    pub fn from_request(request: u8) -> Option<Self> {
        match request {
            0x00 => Some(Region::Ram),
            0x01 => Some(Region::Flash),
            0x02 => Some(Region::Config),
            0x09 => Some(Region::Fuse),
            0x21 => Some(Region::Signature),
            0x40 => Some(Region::Eeprom),
            _ => None,
        }
    }
}

/// A host-to-device command as queued for the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashCommand {
    pub opcode: Opcode,
    pub address: u16,
    pub data: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Command(FlashCommand),
    Read { region: Region, offset: u16, len: u16 },
    /// Valid packet the bootloader has nothing to do for
    Ignored,
}

/// Decoded view of a SETUP packet
#[derive(Clone, Copy)]
pub struct Setup<'a> {
    raw: &'a [u8],
}

impl<'a> Setup<'a> {
    pub fn new(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < SETUP_LEN {
            return Err(ProtocolError::ShortPacket);
        }
        Ok(Self { raw })
    }

    pub fn device_to_host(&self) -> bool {
        self.raw[0] & 0x80 != 0
    }

    pub fn request(&self) -> u8 {
        self.raw[1]
    }

    pub fn value(&self) -> u16 {
        u16::from_le_bytes([self.raw[2], self.raw[3]])
    }

    pub fn index(&self) -> u16 {
        u16::from_le_bytes([self.raw[4], self.raw[5]])
    }

    pub fn length(&self) -> u16 {
        u16::from_le_bytes([self.raw[6], self.raw[7]])
    }

    /// Descriptor type requested by GET_DESCRIPTOR (high byte of wValue)
    pub fn descriptor_type(&self) -> u8 {
        self.raw[3]
    }

    pub fn descriptor_index(&self) -> u8 {
        self.raw[2]
    }
}

/// Decode a vendor request.
///
/// `check_crc` validates the CRC that follows every SETUP packet, reads
/// included, before any field is looked at: a flipped direction bit must not
/// turn a damaged command into an unchecked read.
pub fn parse(raw: &[u8], check_crc: bool) -> Result<Request> {
    let setup = Setup::new(raw)?;

    if check_crc && (raw.len() < SETUP_LEN + 2 || !crc::check(&raw[..SETUP_LEN + 2])) {
        return Err(ProtocolError::InvalidChecksum);
    }

    if setup.device_to_host() {
        return Ok(match Region::from_request(setup.request()) {
            Some(region) => Request::Read {
                region,
                offset: setup.index(),
                len: setup.length(),
            },
            None => Request::Ignored,
        });
    }

    Ok(match Opcode::from_request(setup.request()) {
        Some(opcode) => Request::Command(FlashCommand {
            opcode,
            address: setup.index(),
            data: setup.value(),
        }),
        None => Request::Ignored,
    })
}

/// SETUP packet for a flash command, as the host builds it
pub fn command_packet(opcode: Opcode, address: u16, data: u16) -> [u8; SETUP_LEN] {
    let mut packet = [0u8; SETUP_LEN];
    packet[0] = 0x40;
    packet[1] = opcode as u8;
    packet[2..4].copy_from_slice(&data.to_le_bytes());
    packet[4..6].copy_from_slice(&address.to_le_bytes());
    packet
}

/// SETUP packet for a read
pub fn read_packet(region: Region, offset: u16, len: u16) -> [u8; SETUP_LEN] {
    let mut packet = [0u8; SETUP_LEN];
    packet[0] = 0xc0;
    packet[1] = region as u8;
    packet[4..6].copy_from_slice(&offset.to_le_bytes());
    packet[6..8].copy_from_slice(&len.to_le_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_command_fields() {
        let packet = command_packet(Opcode::Fill, 0x0102, 0xbeef);
        assert_eq!(
            parse(&packet, false),
            Ok(Request::Command(FlashCommand {
                opcode: Opcode::Fill,
                address: 0x0102,
                data: 0xbeef,
            }))
        );
    }

    #[test]
    fn reads_are_checked_like_commands() {
        let packet = read_packet(Region::Signature, 2, 1);
        assert_eq!(parse(&packet, true), Err(ProtocolError::InvalidChecksum));
        assert_eq!(
            parse(&packet, false),
            Ok(Request::Read { region: Region::Signature, offset: 2, len: 1 })
        );

        let sealed: [u8; 10] = crc::seal(packet);
        assert_eq!(
            parse(&sealed, true),
            Ok(Request::Read { region: Region::Signature, offset: 2, len: 1 })
        );
    }

    #[test]
    fn direction_flip_is_caught() {
        let mut sealed: [u8; 10] = crc::seal(command_packet(Opcode::Erase, 0x40, 0));
        sealed[0] ^= 0x80;
        assert_eq!(parse(&sealed, true), Err(ProtocolError::InvalidChecksum));
    }

    #[test]
    fn commands_need_a_valid_checksum_when_checked() {
        let packet = command_packet(Opcode::Erase, 0x40, 0);
        assert_eq!(parse(&packet, true), Err(ProtocolError::InvalidChecksum));

        let sealed: [u8; 10] = crc::seal(packet);
        assert!(matches!(parse(&sealed, true), Ok(Request::Command(_))));

        let mut corrupted = sealed;
        corrupted[4] ^= 0x40;
        assert_eq!(parse(&corrupted, true), Err(ProtocolError::InvalidChecksum));
    }

    #[test]
    fn unknown_requests_are_ignored() {
        let mut packet = command_packet(Opcode::Fill, 0, 0);
        packet[1] = 7;
        assert_eq!(parse(&packet, false), Ok(Request::Ignored));
        packet[0] = 0xc0;
        assert_eq!(parse(&packet, false), Ok(Request::Ignored));
        assert_eq!(parse(&packet[..5], false), Err(ProtocolError::ShortPacket));
    }
}
