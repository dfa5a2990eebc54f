use std::io;

use byteorder::{ReadBytesExt, WriteBytesExt};

/// Fixed-layout frames decoded from inbound datagrams.
pub(crate) trait ReadFrame: Sized {
    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error>;
}

/// Fixed-layout frames encoded into outbound datagrams.
pub(crate) trait WriteFrame {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error>;
}
