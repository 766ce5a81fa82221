//! 802.11 MAC frame parsing and serialization.
//!
//! Implements the subset of the MAC framing the data plane needs:
//! - MAC header: frame control, duration, addresses, sequence control,
//!   optional fourth address and QoS control
//! - Control frame short headers (RA only, or RA + TA)
//! - CCMP/GCMP security header (8 bytes, ExtIV always set)
//! - Additional authenticated data construction for protected frames
//!
//! All multi-byte header fields are little-endian per IEEE 802.11.

use crate::addr::MacAddr;
use crate::{Error, Result};
use airlink_crypto::suite::SECURITY_HEADER_LEN;
use bitflags::bitflags;

/// Length of a three-address MAC header.
pub const MAC_HEADER_LEN: usize = 24;
/// Shortest control frame header (ACK, CTS): FC, duration, RA.
pub const CONTROL_SHORT_LEN: usize = 10;
/// Control frame header carrying a TA (RTS, BlockAck).
pub const CONTROL_LONG_LEN: usize = 16;

const EXT_IV: u8 = 0x20;

/// Frame type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Management frames (beacon, auth, assoc, action...).
    Management,
    /// Control frames (ACK, RTS, CTS, BlockAck...).
    Control,
    /// Data frames.
    Data,
    /// Extension frames (DMG beacon, S1G).
    Extension,
}

impl FrameType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Management,
            1 => Self::Control,
            2 => Self::Data,
            _ => Self::Extension,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::Management => 0,
            Self::Control => 1,
            Self::Data => 2,
            Self::Extension => 3,
        }
    }
}

bitflags! {
    /// Flags octet of the frame control field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FcFlags: u8 {
        /// Frame is headed to the distribution system.
        const TO_DS = 0x01;
        /// Frame is leaving the distribution system.
        const FROM_DS = 0x02;
        /// More fragments follow.
        const MORE_FRAGMENTS = 0x04;
        /// Retransmission.
        const RETRY = 0x08;
        /// Sender enters power save after this frame.
        const POWER_MGMT = 0x10;
        /// More buffered frames for the receiver.
        const MORE_DATA = 0x20;
        /// Body is protected by the negotiated cipher.
        const PROTECTED = 0x40;
        /// +HTC / strictly ordered.
        const ORDER = 0x80;
    }
}

/// Decoded frame control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    /// Frame type.
    pub frame_type: FrameType,
    /// Subtype (4 bits).
    pub subtype: u8,
    /// Flags octet.
    pub flags: FcFlags,
}

impl FrameControl {
    /// Subtype of a QoS data frame.
    pub const SUBTYPE_QOS_DATA: u8 = 0x08;

    /// Frame control for a plain data frame.
    pub fn data(flags: FcFlags) -> Self {
        Self {
            frame_type: FrameType::Data,
            subtype: 0,
            flags,
        }
    }

    /// Decode from the on-air little-endian value.
    pub fn from_u16(value: u16) -> Self {
        let [b0, b1] = value.to_le_bytes();
        Self {
            frame_type: FrameType::from_bits(b0 >> 2),
            subtype: b0 >> 4,
            flags: FcFlags::from_bits_retain(b1),
        }
    }

    /// Encode to the on-air value (protocol version 0).
    pub fn to_u16(self) -> u16 {
        let b0 = (self.frame_type.to_bits() << 2) | ((self.subtype & 0x0f) << 4);
        u16::from_le_bytes([b0, self.flags.bits()])
    }

    /// Data frame carrying a QoS control field.
    pub fn is_qos_data(&self) -> bool {
        self.frame_type == FrameType::Data && self.subtype & Self::SUBTYPE_QOS_DATA != 0
    }

    /// Both DS bits set: four-address frame.
    pub fn has_addr4(&self) -> bool {
        self.frame_type == FrameType::Data
            && self.flags.contains(FcFlags::TO_DS | FcFlags::FROM_DS)
    }
}

/// Parsed MAC header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacHeader {
    /// Frame control.
    pub fc: FrameControl,
    /// Duration / ID.
    pub duration: u16,
    /// Receiver address.
    pub addr1: MacAddr,
    /// Transmitter address (zero for short control frames).
    pub addr2: MacAddr,
    /// BSSID, source or destination depending on DS bits.
    pub addr3: MacAddr,
    /// Sequence control (sequence number << 4 | fragment number).
    pub seq_ctrl: u16,
    /// Fourth address of WDS frames.
    pub addr4: Option<MacAddr>,
    /// QoS control of QoS data frames.
    pub qos: Option<u16>,
}

impl MacHeader {
    /// Header for a three-address data frame.
    pub fn data(receiver: MacAddr, transmitter: MacAddr, bssid: MacAddr, seq: u16) -> Self {
        Self {
            fc: FrameControl::data(FcFlags::empty()),
            duration: 0,
            addr1: receiver,
            addr2: transmitter,
            addr3: bssid,
            seq_ctrl: (seq & 0x0fff) << 4,
            addr4: None,
            qos: None,
        }
    }

    /// Serialized header length.
    pub fn len(&self) -> usize {
        if self.fc.frame_type == FrameType::Control {
            return if self.addr2 == MacAddr::ZERO {
                CONTROL_SHORT_LEN
            } else {
                CONTROL_LONG_LEN
            };
        }
        MAC_HEADER_LEN + self.addr4.map_or(0, |_| 6) + self.qos.map_or(0, |_| 2)
    }

    /// Headers are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Sequence number (12 bits).
    pub fn sequence(&self) -> u16 {
        self.seq_ctrl >> 4
    }

    /// Fragment number (4 bits).
    pub fn fragment(&self) -> u8 {
        (self.seq_ctrl & 0x0f) as u8
    }

    /// Traffic identifier used as CCM nonce priority.
    pub fn priority(&self) -> u8 {
        self.qos.map_or(0, |qc| (qc & 0x0f) as u8)
    }

    /// Whether the body is protected.
    pub fn is_protected(&self) -> bool {
        self.fc.flags.contains(FcFlags::PROTECTED)
    }

    /// Additional authenticated data for CCMP/GCMP.
    ///
    /// Mutable fields are masked: subtype bits 4-6 of data frames, retry,
    /// power management and more-data flags, the sequence number and the
    /// QoS control bits above the TID. The protected flag is always set.
    pub fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(30);
        let [mut b0, mut b1] = self.fc.to_u16().to_le_bytes();
        if self.fc.frame_type == FrameType::Data {
            b0 &= 0x8f;
        }
        b1 &= !(FcFlags::RETRY | FcFlags::POWER_MGMT | FcFlags::MORE_DATA).bits();
        b1 |= FcFlags::PROTECTED.bits();
        if self.qos.is_some() {
            b1 &= !FcFlags::ORDER.bits();
        }
        aad.push(b0);
        aad.push(b1);
        aad.extend_from_slice(self.addr1.octets());
        aad.extend_from_slice(self.addr2.octets());
        aad.extend_from_slice(self.addr3.octets());
        aad.extend_from_slice(&(self.seq_ctrl & 0x000f).to_le_bytes());
        if let Some(a4) = self.addr4 {
            aad.extend_from_slice(a4.octets());
        }
        if let Some(qc) = self.qos {
            aad.extend_from_slice(&(qc & 0x000f).to_le_bytes());
        }
        aad
    }

    fn parse(data: &[u8]) -> Result<Self> {
        check_len(data, CONTROL_SHORT_LEN)?;
        let fc = FrameControl::from_u16(read_u16_le(&data[0..2]));
        let duration = read_u16_le(&data[2..4]);
        let addr1 = MacAddr::from_slice(&data[4..10])?;

        if fc.frame_type == FrameType::Control {
            let addr2 = if data.len() >= CONTROL_LONG_LEN {
                MacAddr::from_slice(&data[10..16])?
            } else {
                MacAddr::ZERO
            };
            return Ok(Self {
                fc,
                duration,
                addr1,
                addr2,
                addr3: MacAddr::ZERO,
                seq_ctrl: 0,
                addr4: None,
                qos: None,
            });
        }

        check_len(data, MAC_HEADER_LEN)?;
        let addr2 = MacAddr::from_slice(&data[10..16])?;
        let addr3 = MacAddr::from_slice(&data[16..22])?;
        let seq_ctrl = read_u16_le(&data[22..24]);
        let mut offset = MAC_HEADER_LEN;

        let addr4 = if fc.has_addr4() {
            check_len(data, offset + 6)?;
            let a4 = MacAddr::from_slice(&data[offset..offset + 6])?;
            offset += 6;
            Some(a4)
        } else {
            None
        };

        let qos = if fc.is_qos_data() {
            check_len(data, offset + 2)?;
            Some(read_u16_le(&data[offset..offset + 2]))
        } else {
            None
        };

        Ok(Self {
            fc,
            duration,
            addr1,
            addr2,
            addr3,
            seq_ctrl,
            addr4,
            qos,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.fc.to_u16().to_le_bytes());
        buf.extend_from_slice(&self.duration.to_le_bytes());
        buf.extend_from_slice(self.addr1.octets());
        if self.fc.frame_type == FrameType::Control {
            if self.addr2 != MacAddr::ZERO {
                buf.extend_from_slice(self.addr2.octets());
            }
            return;
        }
        buf.extend_from_slice(self.addr2.octets());
        buf.extend_from_slice(self.addr3.octets());
        buf.extend_from_slice(&self.seq_ctrl.to_le_bytes());
        if let Some(a4) = self.addr4 {
            buf.extend_from_slice(a4.octets());
        }
        if let Some(qc) = self.qos {
            buf.extend_from_slice(&qc.to_le_bytes());
        }
    }
}

/// CCMP/GCMP header: packet number and key id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityHeader {
    /// 48-bit packet number.
    pub pn: u64,
    /// Key index (0-3).
    pub key_id: u8,
}

impl SecurityHeader {
    /// Parse the 8-byte header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        check_len(data, SECURITY_HEADER_LEN)?;
        if data[3] & EXT_IV == 0 {
            return Err(Error::InvalidFrame("ExtIV bit not set".into()));
        }
        let pn = u64::from_le_bytes([data[0], data[1], data[4], data[5], data[6], data[7], 0, 0]);
        Ok(Self {
            pn,
            key_id: data[3] >> 6,
        })
    }

    /// Serialize to 8 bytes.
    pub fn to_bytes(&self) -> [u8; SECURITY_HEADER_LEN] {
        let pn = self.pn.to_le_bytes();
        [
            pn[0],
            pn[1],
            0,
            EXT_IV | ((self.key_id & 0x03) << 6),
            pn[2],
            pn[3],
            pn[4],
            pn[5],
        ]
    }
}

/// A MAC frame: header plus raw body (FCS excluded).
///
/// For protected frames the body holds the security header, the
/// ciphertext and the MIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// MAC header.
    pub header: MacHeader,
    /// Frame body.
    pub body: Vec<u8>,
}

/// Borrowed pieces of a protected frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectedBody<'a> {
    /// Security header.
    pub security: SecurityHeader,
    /// Encrypted payload.
    pub ciphertext: &'a [u8],
    /// Message integrity code.
    pub mic: &'a [u8],
}

impl Frame {
    /// Parse a frame from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = MacHeader::parse(data)?;
        let body = data[header.len()..].to_vec();
        Ok(Self { header, body })
    }

    /// Serialize frame to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header.len() + self.body.len());
        self.header.write(&mut buf);
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Security header of a protected frame.
    pub fn security_header(&self) -> Result<SecurityHeader> {
        if !self.header.is_protected() {
            return Err(Error::InvalidFrame("Frame is not protected".into()));
        }
        SecurityHeader::parse(&self.body)
    }

    /// Split a protected body given the suite's MIC length.
    pub fn protected_body(&self, mic_len: usize) -> Result<ProtectedBody<'_>> {
        let security = self.security_header()?;
        check_len(&self.body, SECURITY_HEADER_LEN + mic_len)?;
        let (ciphertext, mic) = self.body[SECURITY_HEADER_LEN..].split_at(self.body.len() - SECURITY_HEADER_LEN - mic_len);
        Ok(ProtectedBody {
            security,
            ciphertext,
            mic,
        })
    }

    /// Assemble a protected frame body and set the protected flag.
    pub fn seal_body(&mut self, security: SecurityHeader, ciphertext: &[u8], mic: &[u8]) {
        self.header.fc.flags.insert(FcFlags::PROTECTED);
        let mut body = Vec::with_capacity(SECURITY_HEADER_LEN + ciphertext.len() + mic.len());
        body.extend_from_slice(&security.to_bytes());
        body.extend_from_slice(ciphertext);
        body.extend_from_slice(mic);
        self.body = body;
    }
}

#[inline]
fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(Error::InsufficientData(needed))
    } else {
        Ok(())
    }
}

#[inline]
fn read_u16_le(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}
