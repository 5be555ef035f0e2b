use core::{i32, ops, cmp, fmt};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>.
/// Sequence numbers do not have a discontiguity when compared pairwise across a signed overflow.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    /// Construct from the unsigned value found on the wire.
    pub fn from_wire(value: u32) -> Self {
        SeqNumber(value as i32)
    }

    /// The later of two sequence numbers.
    pub fn max(self, other: SeqNumber) -> SeqNumber {
        if self < other { other } else { self }
    }

    /// The earlier of two sequence numbers.
    pub fn min(self, other: SeqNumber) -> SeqNumber {
        if other < self { other } else { self }
    }

    /// Distance from `earlier` to `self`, or `None` if `earlier` is actually ahead.
    pub fn checked_sub(self, earlier: SeqNumber) -> Option<usize> {
        let result = self.0.wrapping_sub(earlier.0);
        if result < 0 {
            None
        } else {
            Some(result as usize)
        }
    }

    /// Distance from `earlier` to `self`, zero if `earlier` is actually ahead.
    pub fn saturating_sub(self, earlier: SeqNumber) -> usize {
        self.checked_sub(earlier).unwrap_or(0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        if rhs > i32::MAX as usize {
            panic!("attempt to add to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_add(rhs as i32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        if rhs > i32::MAX as usize {
            panic!("attempt to subtract to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_sub(rhs as i32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl ops::Sub for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        match self.checked_sub(rhs) {
            Some(distance) => distance,
            None => panic!("attempt to subtract sequence numbers with underflow"),
        }
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        self.0.wrapping_sub(other.0).partial_cmp(&0)
    }
}

/// A set of tcp flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags(pub u16);

/// The timestamp option of RFC 7323.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TcpTimestamp {
    /// The sender's clock value, `TSval`.
    pub value: u32,
    /// The most recent value received from the other side, `TSecr`.
    pub echo: u32,
}

/// A read/write wrapper around a segment buffer.
#[derive(Debug, PartialEq, Clone)]
pub struct Packet<T> {
    buffer: T,
}

mod field {
    #![allow(non_snake_case)]

    pub(crate) type Field = ::core::ops::Range<usize>;

    pub(crate) const SRC_PORT: Field = 0..2;
    pub(crate) const DST_PORT: Field = 2..4;
    pub(crate) const SEQ_NUM:  Field = 4..8;
    pub(crate) const ACK_NUM:  Field = 8..12;
    pub(crate) const FLAGS:    Field = 12..14;
    pub(crate) const WIN_SIZE: Field = 14..16;
    pub(crate) const CHECKSUM: Field = 16..18;
    pub(crate) const URGENT:   Field = 18..20;

    pub(crate) fn OPTIONS(length: u8) -> Field {
        URGENT.end..(length as usize)
    }

    pub(crate) const FLG_FIN: u16 = 0x001;
    pub(crate) const FLG_SYN: u16 = 0x002;
    pub(crate) const FLG_RST: u16 = 0x004;
    pub(crate) const FLG_PSH: u16 = 0x008;
    pub(crate) const FLG_ACK: u16 = 0x010;
    pub(crate) const FLG_URG: u16 = 0x020;

    pub(crate) const OPT_END: u8 = 0x00;
    pub(crate) const OPT_NOP: u8 = 0x01;
    pub(crate) const OPT_MSS: u8 = 0x02;
    pub(crate) const OPT_WS:  u8 = 0x03;
    pub(crate) const OPT_SACKPERM: u8 = 0x04;
    pub(crate) const OPT_TSTAMP: u8 = 0x08;
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with segment structure.
    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Packet::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no header accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    /// Returns `Err(Error::Malformed)` if the header length field has a value smaller
    /// than the minimal header length.
    ///
    /// The result of this check is invalidated by calling [set_header_len].
    ///
    /// [set_header_len]: #method.set_header_len
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < field::URGENT.end {
            Err(Error::Truncated)
        } else {
            let header_len = self.header_len() as usize;
            if len < header_len {
                Err(Error::Truncated)
            } else if header_len < field::URGENT.end {
                Err(Error::Malformed)
            } else {
                Ok(())
            }
        }
    }

    /// Return the source port field.
    #[inline]
    pub fn src_port(&self) -> u16 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::SRC_PORT])
    }

    /// Return the destination port field.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::DST_PORT])
    }

    /// Return the sequence number field.
    #[inline]
    pub fn seq_number(&self) -> SeqNumber {
        let data = self.buffer.as_ref();
        SeqNumber(NetworkEndian::read_i32(&data[field::SEQ_NUM]))
    }

    /// Return the acknowledgement number field.
    #[inline]
    pub fn ack_number(&self) -> SeqNumber {
        let data = self.buffer.as_ref();
        SeqNumber(NetworkEndian::read_i32(&data[field::ACK_NUM]))
    }

    /// Read all flags at once.
    pub fn flags(&self) -> Flags {
        let data = self.buffer.as_ref();
        Flags(NetworkEndian::read_u16(&data[field::FLAGS]) & 0x1ff)
    }

    /// Return the header length, in octets.
    #[inline]
    pub fn header_len(&self) -> u8 {
        let data = self.buffer.as_ref();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        ((raw >> 12) * 4) as u8
    }

    /// Return the window size field.
    #[inline]
    pub fn window_len(&self) -> u16 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::WIN_SIZE])
    }

    /// Return the options area.
    #[inline]
    pub fn options(&self) -> &[u8] {
        let data = self.buffer.as_ref();
        &data[field::OPTIONS(self.header_len())]
    }

    /// Return the payload following the header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        let data = self.buffer.as_ref();
        &data[self.header_len() as usize..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Set the source port field.
    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::SRC_PORT], value)
    }

    /// Set the destination port field.
    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::DST_PORT], value)
    }

    /// Set the sequence number field.
    #[inline]
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_i32(&mut data[field::SEQ_NUM], value.0)
    }

    /// Set the acknowledgement number field.
    #[inline]
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_i32(&mut data[field::ACK_NUM], value.0)
    }

    /// Set the flags, keeping the header length.
    #[inline]
    pub fn set_flags(&mut self, Flags(flags): Flags) {
        let data = self.buffer.as_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        let raw = (raw & !0x0fff) | (flags & 0x1ff);
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw)
    }

    /// Set the header length, in octets.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        let data = self.buffer.as_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        let raw = (raw & !0xf000) | ((value as u16) / 4) << 12;
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw)
    }

    /// Set the window size field.
    #[inline]
    pub fn set_window_len(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::WIN_SIZE], value)
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::CHECKSUM], value)
    }

    /// Set the urgent pointer field.
    #[inline]
    pub fn set_urgent_at(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::URGENT], value)
    }

    /// Return a mutable view of the options area.
    #[inline]
    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        let data = self.buffer.as_mut();
        &mut data[field::OPTIONS(header_len)]
    }

    /// Return a mutable view of the payload.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        let data = self.buffer.as_mut();
        &mut data[header_len..]
    }
}

impl Flags {
    /// A segment with only the ACK flag.
    pub const ACK: Flags = Flags(field::FLG_ACK);
    /// A connection request.
    pub const SYN: Flags = Flags(field::FLG_SYN);
    /// A connection request answer.
    pub const SYN_ACK: Flags = Flags(field::FLG_SYN | field::FLG_ACK);
    /// A close request carrying an acknowledgement.
    pub const FIN_ACK: Flags = Flags(field::FLG_FIN | field::FLG_ACK);
    /// A reset.
    pub const RST: Flags = Flags(field::FLG_RST);
    /// A reset carrying an acknowledgement.
    pub const RST_ACK: Flags = Flags(field::FLG_RST | field::FLG_ACK);

    /// Return the FIN flag.
    #[inline]
    pub fn fin(&self) -> bool {
        self.0 & field::FLG_FIN != 0
    }

    /// Return the SYN flag.
    #[inline]
    pub fn syn(&self) -> bool {
        self.0 & field::FLG_SYN != 0
    }

    /// Return the RST flag.
    #[inline]
    pub fn rst(&self) -> bool {
        self.0 & field::FLG_RST != 0
    }

    /// Return the PSH flag.
    #[inline]
    pub fn psh(&self) -> bool {
        self.0 & field::FLG_PSH != 0
    }

    /// Return the ACK flag.
    #[inline]
    pub fn ack(&self) -> bool {
        self.0 & field::FLG_ACK != 0
    }

    /// Return the URG flag.
    #[inline]
    pub fn urg(&self) -> bool {
        self.0 & field::FLG_URG != 0
    }

    /// Set the FIN flag.
    #[inline]
    pub fn set_fin(&mut self, value: bool) {
        self.set(field::FLG_FIN, value)
    }

    /// Set the PSH flag.
    #[inline]
    pub fn set_psh(&mut self, value: bool) {
        self.set(field::FLG_PSH, value)
    }

    /// Set the ACK flag.
    #[inline]
    pub fn set_ack(&mut self, value: bool) {
        self.set(field::FLG_ACK, value)
    }

    fn set(&mut self, flag: u16, value: bool) {
        let without = self.0 & !flag;
        self.0 = if value { without | flag } else { without };
    }

    /// Return the length of the control flags, in terms of sequence space.
    pub fn sequence_len(self) -> usize {
        (if self.syn() { 1 } else { 0 })
        + (if self.fin() { 1 }  else { 0 })
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.syn() { write!(f, " syn")? }
        if self.fin() { write!(f, " fin")? }
        if self.rst() { write!(f, " rst")? }
        if self.psh() { write!(f, " psh")? }
        if self.urg() { write!(f, " urg")? }
        Ok(())
    }
}

/// A representation of a single TCP option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    /// Marks the end of the option list.
    EndOfList,
    /// Single byte padding.
    NoOperation,
    /// The largest segment the sender is willing to receive.
    MaxSegmentSize(u16),
    /// The shift count the sender applies to the windows it advertises.
    WindowScale(u8),
    /// Selective acknowledgements are allowed.
    SackPermitted,
    /// Timestamp value and echo.
    Timestamp(TcpTimestamp),
    /// Any other option.
    Unknown {
        /// The option kind byte.
        kind: u8,
        /// The option data, following kind and length.
        data: &'a [u8],
    },
}

impl<'a> TcpOption<'a> {
    /// Parse the first option from the buffer, returning the rest.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let (length, option);
        match *buffer.get(0).ok_or(Error::Truncated)? {
            field::OPT_END => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            field::OPT_NOP => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            kind => {
                length = *buffer.get(1).ok_or(Error::Truncated)? as usize;
                if length < 2 {
                    return Err(Error::Malformed)
                }
                let data = buffer.get(2..length).ok_or(Error::Truncated)?;
                match (kind, length) {
                    (field::OPT_MSS, 4) =>
                        option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
                    (field::OPT_MSS, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_WS, 3) =>
                        option = TcpOption::WindowScale(data[0]),
                    (field::OPT_WS, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_SACKPERM, 2) =>
                        option = TcpOption::SackPermitted,
                    (field::OPT_SACKPERM, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_TSTAMP, 10) =>
                        option = TcpOption::Timestamp(TcpTimestamp {
                            value: NetworkEndian::read_u32(&data[0..4]),
                            echo: NetworkEndian::read_u32(&data[4..8]),
                        }),
                    (field::OPT_TSTAMP, _) =>
                        return Err(Error::Malformed),
                    (_, _) =>
                        option = TcpOption::Unknown { kind, data }
                }
            }
        }
        Ok((&buffer[length..], option))
    }

    /// The number of bytes `emit` writes.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList => 1,
            TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::Timestamp(_) => 10,
            TcpOption::Unknown { data, .. } => 2 + data.len()
        }
    }

    /// Write the option to the front of the buffer, returning the rest.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length;
        match *self {
            TcpOption::EndOfList => {
                length = 1;
                // There may be padding space which also should be initialized.
                for p in buffer.iter_mut() {
                    *p = field::OPT_END;
                }
            }
            TcpOption::NoOperation => {
                length = 1;
                buffer[0] = field::OPT_NOP;
            }
            TcpOption::MaxSegmentSize(value) => {
                length = 4;
                buffer[0] = field::OPT_MSS;
                NetworkEndian::write_u16(&mut buffer[2..4], value);
            }
            TcpOption::WindowScale(value) => {
                length = 3;
                buffer[0] = field::OPT_WS;
                buffer[2] = value;
            }
            TcpOption::SackPermitted => {
                length = 2;
                buffer[0] = field::OPT_SACKPERM;
            }
            TcpOption::Timestamp(TcpTimestamp { value, echo }) => {
                length = 10;
                buffer[0] = field::OPT_TSTAMP;
                NetworkEndian::write_u32(&mut buffer[2..6], value);
                NetworkEndian::write_u32(&mut buffer[6..10], echo);
            }
            TcpOption::Unknown { kind, data: provided } => {
                length = 2 + provided.len();
                buffer[0] = kind;
                buffer[2..length].copy_from_slice(provided)
            }
        }
        if length > 1 {
            buffer[1] = length as u8;
        }
        &mut buffer[length..]
    }
}

/// A high-level representation of a segment header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// Port of the sending endpoint.
    pub src_port:     u16,
    /// Port of the receiving endpoint.
    pub dst_port:     u16,
    /// Control flags. The ACK flag is implied by `ack_number`.
    pub flags:        Flags,
    /// Sequence number of the first byte of the segment (or of the SYN).
    pub seq_number:   SeqNumber,
    /// The acknowledgement, if the ACK flag is set.
    pub ack_number:   Option<SeqNumber>,
    /// The raw window field, before any scaling.
    pub window_len:   u16,
    /// Window scale option, as it was sent. Only meaningful on SYN segments.
    pub window_scale: Option<u8>,
    /// Maximum segment size option. Only meaningful on SYN segments.
    pub max_seg_size: Option<u16>,
    /// Selective acknowledgement permitted option.
    pub sack_permitted: bool,
    /// Timestamp option.
    pub timestamp:    Option<TcpTimestamp>,
    /// Length of the payload following the header.
    pub payload_len:  u16,
}

impl Repr {
    /// An empty segment with the given flags and sequence number.
    pub fn new(flags: Flags, seq_number: SeqNumber) -> Self {
        Repr {
            src_port: 0,
            dst_port: 0,
            flags,
            seq_number,
            ack_number: None,
            window_len: 0,
            window_scale: None,
            max_seg_size: None,
            sack_permitted: false,
            timestamp: None,
            payload_len: 0,
        }
    }

    /// Parse a segment buffer and return the high-level representation.
    ///
    /// Options that can not be parsed end the option list; the rest of the option area is
    /// ignored and the header itself stays valid.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(packet: &Packet<&T>) -> Result<Repr> {
        packet.check_len()?;
        // Source and destination ports must be present.
        if packet.src_port() == 0 { return Err(Error::Malformed) }
        if packet.dst_port() == 0 { return Err(Error::Malformed) }

        let flags = packet.flags();
        let ack_number = if flags.ack() {
            Some(packet.ack_number())
        } else {
            None
        };
        // The PSH flag is ignored.
        // The URG flag and the urgent field is ignored.

        let mut repr = Repr::new(flags, packet.seq_number());
        repr.src_port = packet.src_port();
        repr.dst_port = packet.dst_port();
        repr.ack_number = ack_number;
        repr.window_len = packet.window_len();

        let mut options = packet.options();
        while !options.is_empty() {
            let (next_options, option) = match TcpOption::parse(options) {
                Ok(parsed) => parsed,
                Err(err) => {
                    net_debug!("ignoring options after {}", err);
                    break
                }
            };
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) =>
                    repr.max_seg_size = Some(value),
                TcpOption::WindowScale(value) =>
                    repr.window_scale = Some(value),
                TcpOption::SackPermitted =>
                    repr.sack_permitted = true,
                TcpOption::Timestamp(value) =>
                    repr.timestamp = Some(value),
                TcpOption::Unknown { .. } => (),
            }
            options = next_options;
        }

        repr.payload_len = packet.payload().len() as u16;
        Ok(repr)
    }

    /// Return the length of a header that will be emitted from this high-level representation.
    ///
    /// This should be used for buffer space calculations.
    /// The TCP header length is a multiple of 4.
    pub fn header_len(&self) -> usize {
        let mut length = field::URGENT.end;
        if self.max_seg_size.is_some() {
            length += 4
        }
        if self.window_scale.is_some() {
            length += 3
        }
        if self.sack_permitted {
            length += 2;
        }
        if self.timestamp.is_some() {
            length += 10;
        }
        if length % 4 != 0 {
            length += 4 - length % 4;
        }
        length
    }

    /// Return the length of a packet that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + usize::from(self.payload_len)
    }

    /// Emit a high-level representation into a segment buffer.
    ///
    /// The buffer must hold at least `header_len` bytes. The payload area is not touched.
    pub fn emit<T>(&self, packet: &mut Packet<T>)
        where T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(SeqNumber(0)));
        packet.set_window_len(self.window_len);
        packet.set_header_len(self.header_len() as u8);
        let mut flags = self.flags;
        flags.set_ack(self.ack_number.is_some());
        packet.set_flags(flags);
        packet.set_checksum(0);
        packet.set_urgent_at(0);

        let mut options = packet.options_mut();
        if let Some(value) = self.max_seg_size {
            let tmp = options; options = TcpOption::MaxSegmentSize(value).emit(tmp);
        }
        if let Some(value) = self.window_scale {
            let tmp = options; options = TcpOption::WindowScale(value).emit(tmp);
        }
        if self.sack_permitted {
            let tmp = options; options = TcpOption::SackPermitted.emit(tmp);
        }
        if let Some(value) = self.timestamp {
            let tmp = options; options = TcpOption::Timestamp(value).emit(tmp);
        }
        if !options.is_empty() {
            TcpOption::EndOfList.emit(options);
        }
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self) -> usize {
        usize::from(self.payload_len) + self.flags.sequence_len()
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP src={} dst={}{}", self.src_port, self.dst_port, self.flags)?;
        write!(f, " seq={}", self.seq_number)?;
        if let Some(ack_number) = self.ack_number {
            write!(f, " ack={}", ack_number)?;
        }
        write!(f, " win={}", self.window_len)?;
        write!(f, " len={}", self.payload_len)?;
        if let Some(max_seg_size) = self.max_seg_size {
            write!(f, " mss={}", max_seg_size)?;
        }
        if let Some(scale) = self.window_scale {
            write!(f, " ws={}", scale)?;
        }
        if let Some(ts) = self.timestamp {
            write!(f, " ts={}/{}", ts.value, ts.echo)?;
        }
        Ok(())
    }
}
