use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::packet::{
    Packet, AUTH_FAILED_ID, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
};
use crate::config::RconSettings;
use crate::error::{AppError, Result};
use crate::instance::{Instance, InstanceStore};

/// Short-lived authenticated RCON connections, one per command.
pub struct RconClient {
    store: Arc<dyn InstanceStore>,
    settings: RconSettings,
    next_request_id: AtomicI32,
}

impl RconClient {
    pub fn new(store: Arc<dyn InstanceStore>, settings: RconSettings) -> Self {
        Self {
            store,
            settings,
            next_request_id: AtomicI32::new(1),
        }
    }

    fn request_id(&self) -> i32 {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        if id <= 0 {
            self.next_request_id.store(2, Ordering::Relaxed);
            1
        } else {
            id
        }
    }

    pub fn is_configured(&self, instance_id: &str) -> bool {
        self.store
            .get(instance_id)
            .map(|instance| instance.is_rcon_configured())
            .unwrap_or(false)
    }

    /// Run one command, retrying from a fresh connection on failure.
    /// Unconfigured instances and rejected credentials fail without retry.
    pub async fn execute(&self, instance_id: &str, command: &str) -> Option<String> {
        let instance = match self.store.get(instance_id) {
            Ok(instance) if instance.is_rcon_configured() => instance,
            Ok(_) => {
                log::debug!("RCON not configured for instance {}", instance_id);
                return None;
            }
            Err(e) => {
                log::warn!("RCON lookup failed for instance {}: {}", instance_id, e);
                return None;
            }
        };

        let attempts = self.settings.attempts.max(1);
        for attempt in 1..=attempts {
            match self.execute_once(&instance, command).await {
                Ok(response) => return Some(response),
                Err(e) if e.is_auth_rejected() => {
                    log::warn!("RCON authentication rejected for instance {}", instance_id);
                    return None;
                }
                Err(e) => {
                    log::warn!(
                        "RCON command '{}' for instance {} failed (attempt {}/{}): {}",
                        command,
                        instance_id,
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_delay()).await;
                    }
                }
            }
        }

        log::error!(
            "RCON command '{}' for instance {} failed after {} attempts",
            command,
            instance_id,
            attempts
        );
        None
    }

    /// Fire a command on its own task so a slow server never stalls others.
    pub fn execute_async(self: &Arc<Self>, instance_id: &str, command: &str) -> JoinHandle<Option<String>> {
        let client = Arc::clone(self);
        let instance_id = instance_id.to_string();
        let command = command.to_string();
        tokio::spawn(async move { client.execute(&instance_id, &command).await })
    }

    /// Authenticate only.
    pub async fn test_connection(&self, instance_id: &str) -> bool {
        let Ok(instance) = self.store.get(instance_id) else {
            return false;
        };
        if !instance.is_rcon_configured() {
            return false;
        }
        match self.connect_and_auth(&instance).await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("RCON test for instance {} failed: {}", instance_id, e);
                false
            }
        }
    }

    pub fn connection_info(&self, instance_id: &str) -> String {
        match self.store.get(instance_id) {
            Ok(instance) if instance.is_rcon_configured() => {
                format!("RCON: {}:{}", instance.rcon_host(), instance.rcon_port)
            }
            _ => "RCON: Not configured".to_string(),
        }
    }

    async fn connect_and_auth(&self, instance: &Instance) -> Result<TcpStream> {
        let password = instance
            .rcon_password
            .as_deref()
            .ok_or_else(|| AppError::not_configured(&instance.id))?;
        let addr = (instance.rcon_host(), instance.rcon_port);

        let mut stream = timeout(self.settings.timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| AppError::timeout(format!("connect to {}:{}", addr.0, addr.1)))??;

        let auth_id = self.request_id();
        Packet::new(auth_id, SERVERDATA_AUTH, password)
            .write_to(&mut stream)
            .await?;

        // Some servers send an empty RESPONSE_VALUE ahead of the auth reply.
        let reply = loop {
            let packet = self.read_packet(&mut stream).await?;
            if packet.kind == SERVERDATA_AUTH_RESPONSE {
                break packet;
            }
        };

        if reply.request_id == AUTH_FAILED_ID {
            return Err(AppError::auth_rejected(&instance.id));
        }
        if reply.request_id != auth_id {
            return Err(AppError::protocol(format!(
                "auth response id {} does not match request {}",
                reply.request_id, auth_id
            )));
        }
        Ok(stream)
    }

    async fn execute_once(&self, instance: &Instance, command: &str) -> Result<String> {
        let mut stream = self.connect_and_auth(instance).await?;

        let command_id = self.request_id();
        Packet::new(command_id, SERVERDATA_EXECCOMMAND, command)
            .write_to(&mut stream)
            .await?;

        let response = self.read_packet(&mut stream).await?;
        if response.request_id != command_id {
            return Err(AppError::protocol(format!(
                "response id {} does not match request {}",
                response.request_id, command_id
            )));
        }
        Ok(response.body)
    }

    async fn read_packet(&self, stream: &mut TcpStream) -> Result<Packet> {
        timeout(self.settings.timeout(), Packet::read_from(stream))
            .await
            .map_err(|_| AppError::timeout("RCON read"))?
    }
}
