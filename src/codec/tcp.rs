// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing codec.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, Result},
    frame::{tcp::*, ResponsePdu, MAX_PDU_SIZE},
};

pub(crate) const HEADER_LEN: usize = 7;

pub(crate) const PROTOCOL_ID: ProtocolId = 0x0000;

/// Decodes the shared MBAP framing: one header plus one opaque PDU.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AduDecoder;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ClientCodec {
    decoder: AduDecoder,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ServerCodec {
    decoder: AduDecoder,
}

impl Decoder for AduDecoder {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        // length = one byte unit id + one byte function code + data
        let len = BigEndian::read_u16(&buf[4..6]);
        if len < 2 {
            return Err(Error::InvalidResponseLength(len));
        }
        let pdu_len = usize::from(len) - 1;
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let transaction_id = BigEndian::read_u16(&buf[0..2]);
        let protocol_id = BigEndian::read_u16(&buf[2..4]);
        if protocol_id != PROTOCOL_ID {
            // The byte stream can no longer be trusted to be aligned on
            // frame boundaries; the session must be torn down. The
            // transaction id lets the reader fail the owning request first.
            return Err(Error::InvalidProtocolHeader {
                transaction_id,
                protocol_id,
            });
        }

        let header_data = buf.split_to(HEADER_LEN);
        let unit_id = header_data[6];

        let header = Header {
            transaction_id,
            unit_id,
        };

        let pdu_data = buf.split_to(pdu_len).freeze();
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("<< {} {}", hexdump(&header_data), hexdump(&pdu_data));
        }

        Ok(Some((header, pdu_data)))
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        if let Some((hdr, pdu_data)) = self.decoder.decode(buf)? {
            let pdu = ResponsePdu::try_from(pdu_data)?;
            Ok(Some(ResponseAdu { hdr, pdu }))
        } else {
            Ok(None)
        }
    }
}

/// The server defers PDU decoding to the dispatcher: a malformed PDU body
/// is answered with an exception response, only header-level framing
/// errors terminate the session.
impl Decoder for ServerCodec {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
        self.decoder.decode(buf)
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<()> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        encode_adu(hdr, &pdu_data, buf)
    }
}

/// Raw framing for a PDU that was already encoded and validated upfront.
impl Encoder<(Header, Bytes)> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, (hdr, pdu_data): (Header, Bytes), buf: &mut BytesMut) -> Result<()> {
        encode_adu(hdr, &pdu_data, buf)
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        encode_adu(hdr, &pdu_data, buf)
    }
}

fn encode_adu(hdr: Header, pdu_data: &Bytes, buf: &mut BytesMut) -> Result<()> {
    if pdu_data.len() > MAX_PDU_SIZE {
        return Err(Error::PduSizeExceeded(pdu_data.len()));
    }
    buf.reserve(pdu_data.len() + HEADER_LEN);
    buf.put_u16(hdr.transaction_id);
    buf.put_u16(PROTOCOL_ID);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16((pdu_data.len() + 1) as u16);
    buf.put_u8(hdr.unit_id);
    buf.put_slice(pdu_data);
    if log::log_enabled!(log::Level::Trace) {
        log::trace!(
            ">> {}",
            hexdump(&buf[buf.len() - pdu_data.len() - HEADER_LEN..])
        );
    }
    Ok(())
}

fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02X}"));
    }
    out
}
