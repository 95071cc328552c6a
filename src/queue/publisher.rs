use anyhow::{Context, Result};
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, Connection};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{connection_properties, declare_queue};

/// AMQP "persistent" delivery mode
const PERSISTENT: u8 = 2;

/// Publishes submissions onto the judge queue over a lazily opened channel.
///
/// The connection is (re)established on the first publish after a failure.
pub struct Publisher {
    url: String,
    queue_name: String,
    session: Mutex<Option<(Connection, Channel)>>,
}

impl Publisher {
    pub fn new(url: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_name: queue_name.into(),
            session: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<(Connection, Channel)> {
        let connection = Connection::connect(&self.url, connection_properties())
            .await
            .context("Failed to connect publisher to broker")?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open publisher channel")?;
        declare_queue(&channel, &self.queue_name).await?;
        debug!("Publisher connected to queue {}", self.queue_name);
        Ok((connection, channel))
    }

    pub async fn publish(&self, body: &[u8]) -> Result<()> {
        let mut session = self.session.lock().await;

        let channel = match session.as_ref() {
            Some((connection, channel))
                if connection.status().connected() && channel.status().connected() =>
            {
                channel.clone()
            }
            _ => {
                let (connection, channel) = self.connect().await?;
                *session = Some((connection, channel.clone()));
                channel
            }
        };

        let published = async {
            channel
                .basic_publish(
                    "",
                    &self.queue_name,
                    BasicPublishOptions::default(),
                    body,
                    BasicProperties::default().with_delivery_mode(PERSISTENT),
                )
                .await?
                .await?;
            Ok::<_, lapin::Error>(())
        }
        .await;

        if let Err(e) = published {
            warn!("Publish to {} failed, dropping channel: {}", self.queue_name, e);
            *session = None;
            return Err(e).context("Failed to publish submission");
        }
        Ok(())
    }
}
