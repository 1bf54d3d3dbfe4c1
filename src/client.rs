use crate::adapter::node::{
    node_id, DataValue, NodeMessage, NodeResponse, ReadValueId, StatusCode, Variant, WriteValue,
};
use crate::auth::Role;
use crate::fields::{Attribute, FieldId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("server fault {status}: {message}")]
    Fault {
        status: StatusCode,
        node_id: Option<String>,
        message: String,
    },
    #[error("unexpected response: {0:?}")]
    Unexpected(Box<NodeResponse>),
}

/// Async client for the node protocol.
pub struct NodeClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

impl NodeClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
        })
    }

    pub async fn activate(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Role, ClientError> {
        let message = NodeMessage::ActivateSession {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        };
        match self.request(&message).await? {
            NodeResponse::SessionActivated { role, .. } => Ok(role),
            other => Err(ClientError::Unexpected(Box::new(other))),
        }
    }

    pub async fn read(&mut self, nodes: Vec<ReadValueId>) -> Result<Vec<DataValue>, ClientError> {
        match self.request(&NodeMessage::Read { nodes }).await? {
            NodeResponse::ReadResult { results } => Ok(results),
            other => Err(ClientError::Unexpected(Box::new(other))),
        }
    }

    pub async fn read_field(&mut self, field: FieldId, attribute: Attribute) -> Result<DataValue, ClientError> {
        let nodes = vec![ReadValueId {
            node_id: node_id(field),
            attribute,
        }];
        self.read(nodes)
            .await?
            .pop()
            .ok_or(ClientError::Closed)
    }

    pub async fn write(&mut self, nodes: Vec<WriteValue>) -> Result<Vec<StatusCode>, ClientError> {
        match self.request(&NodeMessage::Write { nodes }).await? {
            NodeResponse::WriteResult { results } => Ok(results),
            other => Err(ClientError::Unexpected(Box::new(other))),
        }
    }

    pub async fn write_field(&mut self, field: FieldId, value: Variant) -> Result<(), ClientError> {
        self.write(vec![WriteValue {
            node_id: node_id(field),
            value,
        }])
        .await
        .map(|_| ())
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        match self.request(&NodeMessage::CloseSession).await {
            Ok(_) | Err(ClientError::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Send one message and wait for its reply. Faults come back as errors.
    pub async fn request(&mut self, message: &NodeMessage) -> Result<NodeResponse, ClientError> {
        let mut json = serde_json::to_string(message)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        self.line.clear();
        if self.reader.read_line(&mut self.line).await? == 0 {
            return Err(ClientError::Closed);
        }
        match serde_json::from_str(self.line.trim())? {
            NodeResponse::Fault {
                status,
                node_id,
                message,
            } => Err(ClientError::Fault {
                status,
                node_id,
                message,
            }),
            response => Ok(response),
        }
    }
}
