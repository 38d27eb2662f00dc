//! Framing of [`Request`]s and [`Response`]s on a byte stream.
//!
//! Messages are bincode encoded back to back with big-endian fixed width integers, so a
//! frame is self delimiting and needs no length prefix. Every write is flushed before it
//! returns.
use std::io::{self, ErrorKind, Read, Write};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_std_read, encode_into_std_write,
    error::DecodeError,
};
use thiserror::Error;

use super::{Request, Response};

type WireConfig = Configuration<BigEndian, Fixint>;

const WIRE: WireConfig = bincode::config::standard()
    .with_big_endian()
    .with_fixed_int_encoding();

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Deserialize(#[from] DecodeError),
    #[error("transport io error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the peer went away rather than sending something malformed.
    pub fn is_disconnect(&self) -> bool {
        let err = match self {
            TransportError::Io(err)
            | TransportError::Deserialize(DecodeError::Io { inner: err, .. }) => err,
            _ => return false,
        };
        matches!(
            err.kind(),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
        )
    }
}

/// One end of a connection. The server reads requests and writes responses; the client
/// does the opposite.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    pub fn write_request(&mut self, req: Request) -> Result<(), TransportError> {
        self.send(req)
    }

    pub fn write_response(&mut self, resp: Response) -> Result<(), TransportError> {
        self.send(resp)
    }

    pub fn read_request(&mut self) -> Result<Request, TransportError> {
        self.recv()
    }

    pub fn read_response(&mut self) -> Result<Response, TransportError> {
        self.recv()
    }

    fn send<M: Encode>(&mut self, message: M) -> Result<(), TransportError> {
        encode_into_std_write(message, &mut self.stream, WIRE)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv<M: Decode<()>>(&mut self) -> Result<M, TransportError> {
        Ok(decode_from_std_read(&mut self.stream, WIRE)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek};

    use super::*;
    use crate::{
        config::OpenOptions,
        protocol::response::ResponseError,
        statement::{Row, SqlStatement, SqlValue, StatementOutcome},
    };

    #[test]
    fn read_write_request() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        let req = Request::ExecuteBatch {
            name: "a.db".into(),
            statements: vec![SqlStatement::new(
                "INSERT INTO t VALUES (?, ?, ?)",
                vec![SqlValue::Integer(1), SqlValue::Real(2.5), SqlValue::Null],
            )],
        };
        transport.write_request(req.clone()).unwrap();
        transport.write_request(Request::Disconnect).unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();

        assert_eq!(transport.read_request().unwrap(), req);
        assert_eq!(transport.read_request().unwrap(), Request::Disconnect);
    }

    #[test]
    fn read_write_open_request() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        let req = Request::Open {
            name: "ro.db".into(),
            options: OpenOptions::read_only().with_location("/srv/dbs"),
        };
        transport.write_request(req.clone()).unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();

        assert_eq!(transport.read_request().unwrap(), req);
    }

    #[test]
    fn read_write_response() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        let outcomes = Response::Outcomes(vec![
            StatementOutcome::Rows(vec![Row {
                columns: vec![("x".into(), SqlValue::Text("a".into()))],
            }]),
            StatementOutcome::Error("no such table: t".into()),
        ]);
        let err = Response::Err {
            code: ResponseError::NotOpen,
            description: "database not open: a.db".into(),
        };
        transport.write_response(outcomes.clone()).unwrap();
        transport.write_response(err.clone()).unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();

        assert_eq!(transport.read_response().unwrap(), outcomes);
        assert_eq!(transport.read_response().unwrap(), err);
    }

    #[test]
    fn closed_stream_is_disconnect() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));

        let err = transport.read_request().unwrap_err();
        assert!(err.is_disconnect(), "{err:?}");
    }

    #[test]
    fn truncated_frame_is_decode_error() {
        let stream = Cursor::new(vec![0u8, 0, 0]);
        let mut transport = ProtocolTransport::new(stream);

        assert!(matches!(
            transport.read_request(),
            Err(TransportError::Deserialize(_))
        ));
    }

    #[test]
    fn unknown_variant_is_not_disconnect() {
        let stream = Cursor::new(vec![0xffu8; 8]);
        let mut transport = ProtocolTransport::new(stream);

        let err = transport.read_request().unwrap_err();
        assert!(matches!(err, TransportError::Deserialize(_)));
        assert!(!err.is_disconnect());
    }
}
