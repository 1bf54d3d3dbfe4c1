//! Modbus/TCP listener in front of [`RegisterAdapter`].
//!
//! Modbus carries no credentials, so a connection is authenticated by its peer
//! address once, when it is accepted.

use crate::adapter::register::{RegisterException, RegisterRequest, RegisterResponse};
use crate::adapter::{ProtocolAdapter, RegisterAdapter};
use crate::auth::{Credential, Identity};
use std::future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_modbus::prelude::{ExceptionCode, Request, Response};
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tracing::{debug, error, info};

/// One Modbus connection: the shared adapter plus the identity fixed at accept time.
pub struct RegisterService {
    adapter: Arc<RegisterAdapter>,
    identity: Identity,
    peer: SocketAddr,
}

impl RegisterService {
    pub fn new(adapter: Arc<RegisterAdapter>, peer: SocketAddr) -> Self {
        let identity = adapter
            .gateway()
            .authenticator()
            .authenticate(&Credential::Peer(peer.ip()));
        adapter.gateway().metrics().record_session();
        info!(%peer, role = ?identity.role(), "modbus session opened");
        Self {
            adapter,
            identity,
            peer,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl tokio_modbus::server::Service for RegisterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!(peer = %self.peer, ?req, "modbus request");
        let request = match req {
            Request::ReadHoldingRegisters(address, count) => {
                RegisterRequest::ReadHoldingRegisters { address, count }
            }
            Request::WriteSingleRegister(address, value) => {
                RegisterRequest::WriteSingleRegister { address, value }
            }
            Request::WriteMultipleRegisters(address, values) => RegisterRequest::WriteMultipleRegisters {
                address,
                values: values.into_owned(),
            },
            _ => return future::ready(Err(ExceptionCode::IllegalFunction)),
        };

        let result = self
            .adapter
            .handle(&self.identity, request)
            .map(|response| match response {
                RegisterResponse::ReadHoldingRegisters(words) => {
                    Response::ReadHoldingRegisters(words.to_vec())
                }
                RegisterResponse::WriteSingleRegister { address, value } => {
                    Response::WriteSingleRegister(address, value)
                }
                RegisterResponse::WriteMultipleRegisters { address, count } => {
                    Response::WriteMultipleRegisters(address, count)
                }
            })
            .map_err(exception_code);
        future::ready(result)
    }
}

pub fn exception_code(exception: RegisterException) -> ExceptionCode {
    match exception {
        RegisterException::IllegalFunction => ExceptionCode::IllegalFunction,
        RegisterException::IllegalDataAddress => ExceptionCode::IllegalDataAddress,
        RegisterException::IllegalDataValue => ExceptionCode::IllegalDataValue,
    }
}

/// Serve Modbus/TCP on an already bound listener until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    adapter: Arc<RegisterAdapter>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "🌐 Modbus/TCP server listening");
    let server = Server::new(listener);

    let on_connected = |stream: TcpStream, socket_addr: SocketAddr| {
        let adapter = Arc::clone(&adapter);
        async move {
            accept_tcp_connection(stream, socket_addr, move |peer: SocketAddr| {
                Ok(Some(RegisterService::new(Arc::clone(&adapter), peer)))
            })
        }
    };
    let on_process_error = |err: io::Error| {
        error!("modbus connection error: {}", err);
    };

    tokio::select! {
        result = server.serve(&on_connected, on_process_error) => {
            result?;
        }
        _ = wait_for_shutdown(&mut shutdown) => {
            info!("Modbus/TCP server stopped");
        }
    }
    Ok(())
}

pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
