//! TURN credential issuing and ICE server advertisement
//!
//! The relay itself runs out of process; the hub only mints the short-lived
//! REST-style credentials it understands and tells clients where to find it
//! via the `iceServers` list in `HELLO`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use droplink_proto::IceServer;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::HubConfig;

type HmacSha1 = Hmac<Sha1>;

/// Lifetime of issued relay credentials.
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Public STUN fallback advertised when no TURN relay is configured.
pub const FALLBACK_STUN: &str = "stun:stun.l.google.com:19302";

/// One ephemeral credential pair for the co-hosted relay.
#[derive(Debug, Clone)]
pub struct RelayCredentials {
    pub username: String,
    pub password: String,
}

/// Mint REST-style ephemeral credentials: the username is the expiry unix
/// timestamp and the password is derived from it with the shared secret, so
/// the relay can verify both without storing anything.
pub fn relay_credentials(secret: &str, ttl: Duration) -> RelayCredentials {
    let expiry = SystemTime::now() + ttl;
    let unix = expiry
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let username = unix.to_string();
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(username.as_bytes());
    let password = B64.encode(mac.finalize().into_bytes());
    RelayCredentials { username, password }
}

/// Build the `iceServers` list for one `HELLO`.
///
/// With TURN disabled this is just the public STUN fallback. Otherwise the
/// relay host doubles as a STUN server, and TURN URLs with fresh credentials
/// are added when a realm and secret are configured.
pub fn ice_servers(config: &HubConfig, request_host: Option<&str>) -> Vec<IceServer> {
    let turn = &config.turn;
    if turn.port == 0 {
        return vec![IceServer {
            urls: vec![FALLBACK_STUN.to_string()],
            username: None,
            credential: None,
        }];
    }

    let mut host = ice_host(config, request_host);
    if host == "localhost" {
        host = "127.0.0.1".to_string();
    }
    let host_port = join_host_port(&host, turn.port);

    let mut servers = vec![IceServer {
        urls: vec![format!("stun:{host_port}")],
        username: None,
        credential: None,
    }];

    if turn.secret.is_empty() || turn.realm.is_empty() {
        return servers;
    }

    let credentials = relay_credentials(&turn.secret, CREDENTIAL_TTL);
    servers.push(IceServer {
        urls: vec![
            format!("turn:{host_port}?transport=udp"),
            format!("turn:{host_port}?transport=tcp"),
        ],
        username: Some(credentials.username),
        credential: Some(credentials.password),
    });
    servers
}

/// Pick the hostname clients should dial: configured public host, then
/// public IP, then whatever host the upgrade request was addressed to.
fn ice_host(config: &HubConfig, request_host: Option<&str>) -> String {
    if let Some(host) = config.server.public_host.as_deref() {
        if !host.is_empty() {
            return host.to_string();
        }
    }
    if let Some(ip) = config.server.public_ip.as_deref() {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(host) = request_host {
        if !host.is_empty() {
            return host.to_string();
        }
    }
    "127.0.0.1".to_string()
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;

    #[test]
    fn credentials_expire_in_the_future() {
        let credentials = relay_credentials("swordfish", CREDENTIAL_TTL);
        let expiry: u64 = credentials.username.parse().unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(expiry > now, "credential must not be born expired");
        // base64 of a SHA-1 HMAC is 28 chars.
        assert_eq!(credentials.password.len(), 28);
        assert_eq!(B64.decode(&credentials.password).unwrap().len(), 20);
    }

    #[test]
    fn password_is_bound_to_the_username() {
        let a = relay_credentials("swordfish", Duration::from_secs(100));
        let b = relay_credentials("swordfish", Duration::from_secs(2000));
        assert_ne!(a.username, b.username);
        assert_ne!(a.password, b.password);
    }

    #[test]
    fn disabled_turn_falls_back_to_public_stun() {
        let mut config = HubConfig::default();
        config.turn.port = 0;
        let servers = ice_servers(&config, Some("example.org"));
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec![FALLBACK_STUN.to_string()]);
        assert!(servers[0].username.is_none());
    }

    #[test]
    fn stun_only_without_a_secret() {
        let config = HubConfig::default();
        let servers = ice_servers(&config, Some("example.org"));
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:example.org:3478".to_string()]);
    }

    #[test]
    fn turn_urls_carry_credentials() {
        let mut config = HubConfig::default();
        config.turn.secret = "swordfish".to_string();
        let servers = ice_servers(&config, Some("example.org"));
        assert_eq!(servers.len(), 2);
        assert_eq!(
            servers[1].urls,
            vec![
                "turn:example.org:3478?transport=udp".to_string(),
                "turn:example.org:3478?transport=tcp".to_string(),
            ]
        );
        assert!(servers[1].username.is_some());
        assert!(servers[1].credential.is_some());
    }

    #[test]
    fn public_host_beats_the_request_host() {
        let mut config = HubConfig::default();
        config.server.public_host = Some("drop.example.com".to_string());
        let servers = ice_servers(&config, Some("10.0.0.5"));
        assert_eq!(
            servers[0].urls,
            vec!["stun:drop.example.com:3478".to_string()]
        );
    }

    #[test]
    fn localhost_is_rewritten() {
        let config = HubConfig::default();
        let servers = ice_servers(&config, Some("localhost"));
        assert_eq!(servers[0].urls, vec!["stun:127.0.0.1:3478".to_string()]);
    }
}
