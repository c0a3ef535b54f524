// Shardmap is an open source distributed word-count engine.
// Copyright (C) 2024 Shardmap contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Framed request/response messaging over TCP.
//!
//! Every frame is a 4-byte big-endian length header followed by a
//! bincode-encoded payload. A connection carries exactly one request and
//! one response and is then shut down; connections are never pooled.

use std::{net::SocketAddr, time::Duration};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
};

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

const HEADER_SIZE: usize = std::mem::size_of::<u32>();

#[derive(Error, Debug)]
pub enum Error {
    #[error("Got an IO error")]
    IO(#[from] std::io::Error),

    #[error("Error while serializing/deserializing to/from bytes")]
    Serialization(#[from] bincode::Error),

    #[error("Failed to connect to peer: connection timeout")]
    ConnectionTimeout,
}

async fn write_frame<S>(stream: &mut S, body: &[u8]) -> Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    let header = (body.len() as u32).to_be_bytes();

    stream.write_all(&header).await?;
    stream.write_all(body).await?;
    stream.flush().await?;

    Ok(())
}

async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncReadExt + Unpin,
{
    let mut header_buf = [0; HEADER_SIZE];
    stream.read_exact(&mut header_buf).await?;
    let body_size = u32::from_be_bytes(header_buf) as usize;

    let mut buf = vec![0; body_size];
    stream.read_exact(&mut buf).await?;

    Ok(buf)
}

/// An accepted request together with the stream its response must go to.
pub struct Request<T> {
    stream: TcpStream,
    pub body: T,
}

impl<T> Request<T> {
    pub async fn respond<R: Serialize>(mut self, response: R) -> Result<()> {
        let bytes = bincode::serialize(&response)?;

        write_frame(&mut self.stream, &bytes).await?;
        self.stream.shutdown().await?;

        Ok(())
    }
}

/// An accepted connection whose request frame has not been read yet.
/// Reading happens in [`Incoming::request`], so a server can hand the
/// connection off to its own task before touching the socket again.
pub struct Incoming {
    stream: TcpStream,
}

impl Incoming {
    pub async fn request<T>(mut self) -> Result<Request<T>>
    where
        T: DeserializeOwned,
    {
        let buf = read_frame(&mut self.stream).await?;
        let body = bincode::deserialize(&buf)?;

        Ok(Request {
            stream: self.stream,
            body,
        })
    }
}

pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept_conn(&self) -> Result<Incoming> {
        let (stream, client) = self.listener.accept().await?;
        tracing::debug!("accepted connection from: {}", &client);

        Ok(Incoming { stream })
    }

    pub async fn accept<T>(&self) -> Result<Request<T>>
    where
        T: DeserializeOwned,
    {
        self.accept_conn().await?.request().await
    }
}

pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub async fn create(server: impl ToSocketAddrs) -> Result<Self> {
        Self::create_with_timeout(server, Duration::from_secs(30)).await
    }

    pub async fn create_with_timeout(
        server: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Self> {
        match tokio::time::timeout(timeout, TcpStream::connect(server)).await {
            Ok(stream) => {
                let stream = stream?;
                Ok(Connection { stream })
            }
            Err(_) => Err(Error::ConnectionTimeout),
        }
    }

    pub async fn send_without_timeout<T: Serialize, R: DeserializeOwned>(
        mut self,
        request: &T,
    ) -> Result<R> {
        let bytes = bincode::serialize(request)?;
        write_frame(&mut self.stream, &bytes).await?;

        let buf = read_frame(&mut self.stream).await?;
        let response = bincode::deserialize(&buf)?;

        self.stream.shutdown().await?;

        Ok(response)
    }

    pub async fn send<T: Serialize, R: DeserializeOwned>(self, request: &T) -> Result<R> {
        self.send_with_timeout(request, Duration::from_secs(30))
            .await
    }

    /// One full exchange bounded by `timeout`. The dial timeout is short;
    /// callers raise this bound instead for phases that legitimately run
    /// long, so a slow map is not mistaken for a dead peer.
    pub async fn send_with_timeout<T: Serialize, R: DeserializeOwned>(
        self,
        request: &T,
        timeout: Duration,
    ) -> Result<R> {
        match tokio::time::timeout(timeout, self.send_without_timeout(request)).await {
            Ok(res) => res,
            Err(_) => Err(Error::ConnectionTimeout),
        }
    }
}
