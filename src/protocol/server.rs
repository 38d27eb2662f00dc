use std::{
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{Arc, mpsc::Receiver},
};

use log::{debug, info, warn};

use crate::{
    dispatcher::Dispatcher,
    error::{Error, Result},
    protocol::{ProtocolTransport, Request, Response},
    worker::Responder,
};

use super::{ThreadPool, transport::TransportError};

pub struct StorageServer {
    address: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    pool: ThreadPool,
}

impl StorageServer {
    pub fn new(address: SocketAddr, dispatcher: Arc<Dispatcher>, workers: usize) -> Self {
        Self {
            address,
            dispatcher,
            pool: ThreadPool::new(workers),
        }
    }

    pub fn listen(self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.address)?;
        info!(
            "listening at {} with {} connection workers",
            self.address,
            self.pool.size()
        );
        self.serve(listener);
        Ok(())
    }

    fn serve(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    self.pool.execute(move || {
                        match handle_connection(stream, &dispatcher) {
                            Ok(()) => {}
                            Err(e) if e.is_disconnect() => debug!("client went away: {e}"),
                            Err(e) => warn!("connection ended: {e}"),
                        }
                    });
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
    }
}

fn handle_connection(stream: TcpStream, dispatcher: &Dispatcher) -> Result<(), TransportError> {
    if let Ok(peer) = stream.peer_addr() {
        debug!("accepted connection from {peer}");
    }
    let mut transport = ProtocolTransport::new(stream);

    loop {
        let req = transport.read_request()?;
        debug!("received request: {req:?}");

        if req == Request::Disconnect {
            transport.write_response(Response::ConnectionClosed)?;
            return Ok(());
        }

        transport.write_response(respond(dispatcher, req))?;
    }
}

/// Runs one request against the dispatcher, blocking until its reply arrives.
pub(crate) fn respond(dispatcher: &Dispatcher, req: Request) -> Response {
    let result = match req {
        Request::Open { name, options } => {
            let (reply, rx) = Responder::channel();
            dispatcher.open(&name, options, reply);
            wait(rx).map(|opened| Response::Opened { id: opened.id })
        }
        Request::ExecuteBatch { name, statements } => {
            let (reply, rx) = Responder::channel();
            dispatcher.execute_batch(&name, statements, reply);
            wait(rx).map(Response::Outcomes)
        }
        Request::ExecuteFlatBatch { wire } => {
            let (reply, rx) = Responder::channel();
            dispatcher.execute_flat_batch(wire, reply);
            wait(rx).map(Response::FlatResults)
        }
        Request::Close { name } => {
            let (reply, rx) = Responder::channel();
            dispatcher.close(&name, reply);
            wait(rx).map(|()| Response::Ok)
        }
        Request::Delete { name, location } => {
            let (reply, rx) = Responder::channel();
            dispatcher.delete(&name, location.as_deref(), reply);
            wait(rx).map(|()| Response::Ok)
        }
        Request::Echo(value) => Ok(Response::Echo(dispatcher.echo(value))),
        Request::Disconnect => Ok(Response::ConnectionClosed),
    };

    result.unwrap_or_else(Response::from)
}

fn wait<T>(rx: Receiver<Result<T>>) -> Result<T> {
    rx.recv().unwrap_or(Err(Error::Abandoned))
}

#[cfg(test)]
mod tests {
    use std::{net::TcpStream, thread};

    use tempdir::TempDir;

    use super::*;
    use crate::{
        codec,
        config::{Config, OpenOptions},
        protocol::response::ResponseError,
        statement::{SqlStatement, StatementOutcome},
    };

    fn dispatcher() -> (TempDir, Dispatcher) {
        let dir = TempDir::new("sqlrunner").unwrap();
        let dispatcher = Dispatcher::new(Config::new(dir.path()));
        (dir, dispatcher)
    }

    #[test]
    fn respond_runs_lifecycle() {
        let (_dir, dispatcher) = dispatcher();

        let Response::Opened { id } = respond(
            &dispatcher,
            Request::Open {
                name: "a.db".into(),
                options: OpenOptions::default(),
            },
        ) else {
            panic!("open failed");
        };

        let resp = respond(
            &dispatcher,
            Request::ExecuteBatch {
                name: "a.db".into(),
                statements: vec![SqlStatement::plain("CREATE TABLE t(x)")],
            },
        );
        assert_eq!(resp, Response::Outcomes(vec![StatementOutcome::Ok]));

        let request = codec::encode_request(id, &[SqlStatement::plain("SELECT 1")]).unwrap();
        let Response::FlatResults(stream) = respond(
            &dispatcher,
            Request::ExecuteFlatBatch {
                wire: request.to_wire(),
            },
        ) else {
            panic!("flat batch failed");
        };
        assert_eq!(codec::decode_results(&stream).unwrap().len(), 1);

        let close = Request::Close {
            name: "a.db".into(),
        };
        assert_eq!(respond(&dispatcher, close), Response::Ok);
    }

    #[test]
    fn respond_maps_errors() {
        let (_dir, dispatcher) = dispatcher();

        let resp = respond(
            &dispatcher,
            Request::ExecuteBatch {
                name: "ghost".into(),
                statements: vec![],
            },
        );
        assert!(matches!(
            resp,
            Response::Err {
                code: ResponseError::NotOpen,
                ..
            }
        ));
    }

    #[test]
    fn serves_over_tcp() {
        let (_dir, dispatcher) = dispatcher();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = StorageServer::new(address, Arc::new(dispatcher), 1);

        // The server thread is left running; it blocks on accept for the rest of the test run.
        thread::spawn(move || server.serve(listener));

        let mut client = ProtocolTransport::new(TcpStream::connect(address).unwrap());
        client.write_request(Request::Echo("ping".into())).unwrap();
        assert_eq!(
            client.read_response().unwrap(),
            Response::Echo("ping".into())
        );

        client.write_request(Request::Disconnect).unwrap();
        assert_eq!(client.read_response().unwrap(), Response::ConnectionClosed);
    }

    #[test]
    fn dropped_client_is_disconnect() {
        let (_dir, dispatcher) = dispatcher();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let client = TcpStream::connect(address).unwrap();
        let (stream, _) = listener.accept().unwrap();
        drop(client);

        let err = handle_connection(stream, &dispatcher).unwrap_err();
        assert!(err.is_disconnect(), "{err:?}");
    }
}
