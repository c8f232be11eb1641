// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Broker transport: the connect / subscribe / receive capability the live
// subscriber drives, with an MQTT implementation on rumqttc.

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    SubAck, SubscribeReasonCode,
};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::BrokerConfig;

/// MQTT 3.1.1 CONNACK code for an accepted connection
pub const CONNACK_ACCEPTED: u8 = 0;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("not connected")]
    NotConnected,
}

/// One broker connection at a time
#[async_trait]
pub trait BrokerTransport: Send {
    /// Open a connection and wait for the broker's acknowledgement.
    /// Returns the CONNACK reason code; anything but `CONNACK_ACCEPTED`
    /// leaves the transport disconnected.
    async fn connect(&mut self) -> Result<u8, TransportError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Next inbound payload. An error means the connection is gone.
    async fn recv(&mut self) -> Result<Bytes, TransportError>;

    /// Release the connection, if any
    async fn disconnect(&mut self);
}

/// Produces a fresh transport for each live session
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn BrokerTransport>;
}

/// rumqttc-backed transport
pub struct MqttTransport {
    options: MqttOptions,
    connect_timeout: Duration,
    connection: Option<(AsyncClient, EventLoop)>,
}

impl MqttTransport {
    pub fn new(config: &BrokerConfig) -> Self {
        let client_id = format!(
            "{}-{}",
            config.client_id_prefix,
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));
        options.set_credentials(config.username.clone(), config.password.clone());
        options.set_clean_session(true);
        options.set_max_packet_size(256 * 1024, 16 * 1024);

        Self {
            options,
            connect_timeout: config.connect_timeout(),
            connection: None,
        }
    }
}

/// A SUBACK carrying a failure code means the broker refused the topic
fn check_suback(ack: &SubAck) -> Result<(), TransportError> {
    if ack
        .return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        return Err(TransportError::Subscribe(format!(
            "broker refused subscription (packet {})",
            ack.pkid
        )));
    }
    Ok(())
}

fn reason_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&mut self) -> Result<u8, TransportError> {
        self.connection = None;

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 32);
        let timeout = self.connect_timeout;

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(reason_code(ack.code)),
                    Ok(event) => debug!(?event, "Event before CONNACK"),
                    Err(ConnectionError::ConnectionRefused(code)) => return Ok(reason_code(code)),
                    Err(e) => return Err(TransportError::Connection(e.to_string())),
                }
            }
        };

        let code = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        if code == CONNACK_ACCEPTED {
            self.connection = Some((client, eventloop));
        }
        Ok(code)
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let (client, _) = self.connection.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        let (_, eventloop) = self.connection.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(topic = %publish.topic, bytes = publish.payload.len(), "Publish received");
                    return Ok(publish.payload);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    check_suback(&ack)?;
                    debug!(pkid = ack.pkid, "Subscription acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    self.connection = None;
                    return Err(TransportError::Connection(e.to_string()));
                }
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some((client, mut eventloop)) = self.connection.take() {
            if client.try_disconnect().is_ok() {
                // Let the event loop flush the DISCONNECT packet
                let _ = tokio::time::timeout(Duration::from_secs(1), eventloop.poll()).await;
            }
        }
    }
}

/// Builds `MqttTransport`s from broker configuration
pub struct MqttTransportFactory {
    config: BrokerConfig,
}

impl MqttTransportFactory {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for MqttTransportFactory {
    fn create(&self) -> Box<dyn BrokerTransport> {
        Box::new(MqttTransport::new(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suback_granted() {
        let ack = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert!(check_suback(&ack).is_ok());
    }

    #[test]
    fn test_suback_failure_is_subscribe_error() {
        let ack = SubAck::new(7, vec![SubscribeReasonCode::Failure]);
        assert!(matches!(
            check_suback(&ack),
            Err(TransportError::Subscribe(_))
        ));
    }

    #[test]
    fn test_reason_code_mapping() {
        assert_eq!(reason_code(ConnectReturnCode::Success), CONNACK_ACCEPTED);
        assert_eq!(reason_code(ConnectReturnCode::NotAuthorized), 5);
    }
}
