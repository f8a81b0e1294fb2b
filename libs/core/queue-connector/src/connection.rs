//! Broker connection management.
//!
//! Owns the connection factory (resolved once and cached), the single
//! connection, and the sessions created on it.

use crate::broker::{AckMode, Connection, ConnectionFactory, Destination, NamingContext, Session};
use crate::error::{BrokerError, ConnectorError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connection factory, connection and sessions of one connector.
pub struct ConnectionManager {
    naming: Arc<dyn NamingContext>,
    factory_name: String,
    factory: Option<Arc<dyn ConnectionFactory>>,
    connection: Option<Box<dyn Connection>>,
    sessions: Vec<Box<dyn Session>>,
}

impl ConnectionManager {
    pub fn new(naming: Arc<dyn NamingContext>, factory_name: impl Into<String>) -> Self {
        Self {
            naming,
            factory_name: factory_name.into(),
            factory: None,
            connection: None,
            sessions: Vec::new(),
        }
    }

    /// Resolve the connection factory by name. The first successful lookup
    /// is cached and returned on every later call.
    pub fn resolve_connection_factory(
        &mut self,
    ) -> Result<Arc<dyn ConnectionFactory>, ConnectorError> {
        if let Some(factory) = &self.factory {
            debug!(factory = %self.factory_name, "Connection factory is already created");
            return Ok(Arc::clone(factory));
        }

        let factory = self
            .naming
            .lookup_connection_factory(&self.factory_name)
            .map_err(|e| {
                ConnectorError::configuration(
                    format!("connection factory '{}' cannot be resolved", self.factory_name),
                    Some(e),
                )
            })?;

        info!(factory = %self.factory_name, "Connection factory resolved");
        self.factory = Some(Arc::clone(&factory));
        Ok(factory)
    }

    /// Create and start the connection. No-op when already open.
    pub async fn open_connection(&mut self) -> Result<(), ConnectorError> {
        if self.connection.is_some() {
            debug!("Connection is already open");
            return Ok(());
        }

        let factory = self.resolve_connection_factory()?;
        let connection = factory
            .create_connection()
            .await
            .map_err(ConnectorError::Connection)?;

        if let Err(e) = connection.start().await {
            if let Err(close_err) = connection.close().await {
                warn!(error = %close_err, "Failed to close connection that did not start");
            }
            return Err(ConnectorError::Connection(e));
        }

        info!("Connection started");
        self.connection = Some(connection);
        Ok(())
    }

    /// Resolve a destination on the open connection.
    pub async fn lookup_destination(&self, uri: &str) -> Result<Destination, ConnectorError> {
        let connection = self.connection()?;
        connection
            .lookup_destination(uri)
            .await
            .map_err(ConnectorError::ConsumerCreation)
    }

    /// Create a session on the open connection. The manager keeps ownership
    /// so that sessions are closed with the connection.
    pub async fn create_session(&mut self, ack_mode: AckMode) -> Result<&dyn Session, ConnectorError> {
        let session = self
            .connection()?
            .create_session(ack_mode)
            .await
            .map_err(ConnectorError::ConsumerCreation)?;

        self.sessions.push(session);
        let index = self.sessions.len() - 1;
        Ok(self.sessions[index].as_ref())
    }

    /// Close every session, then the connection.
    ///
    /// Each step is attempted even if an earlier one fails; failures are
    /// logged and returned. Afterwards the manager holds no connection or
    /// sessions (the resolved factory stays cached).
    pub async fn close_connection(&mut self) -> Vec<ConnectorError> {
        let mut failures = Vec::new();

        for session in self.sessions.drain(..) {
            if let Err(e) = session.close().await {
                let err = ConnectorError::Shutdown(e);
                warn!(error = %err, "Failed to close session");
                failures.push(err);
            }
        }

        if let Some(connection) = self.connection.take() {
            match connection.close().await {
                Ok(()) => info!("Connection closed"),
                Err(e) => {
                    let err = ConnectorError::Shutdown(e);
                    warn!(error = %err, "Failed to close connection");
                    failures.push(err);
                }
            }
        }

        failures
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn connection(&self) -> Result<&dyn Connection, ConnectorError> {
        self.connection
            .as_deref()
            .ok_or_else(|| ConnectorError::Connection(BrokerError::Closed("Connection")))
    }
}
