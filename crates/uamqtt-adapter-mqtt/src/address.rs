//! Broker address parsing.

use url::Url;

/// Default MQTT port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Invalid broker address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Address could not be parsed
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
}

/// Parse `tcp://host:port`, `mqtt://host:port`, `host:port` or `host` into
/// host and port.
///
/// # Errors
///
/// `AddressError::InvalidBrokerUrl` for unsupported schemes, a missing host
/// or an invalid port.
pub fn parse_mqtt_url(input: &str) -> Result<(String, u16), AddressError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| AddressError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(AddressError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| AddressError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(DEFAULT_MQTT_PORT);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AddressError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => DEFAULT_MQTT_PORT,
        Some(port) => port.parse().map_err(|_| {
            AddressError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'"))
        })?,
    };
    if parts.next().is_some() {
        return Err(AddressError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_forms() {
        assert_eq!(
            parse_mqtt_url("tcp://broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            parse_mqtt_url("mqtt://broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
    }

    #[test]
    fn host_port_forms() {
        assert_eq!(
            parse_mqtt_url("localhost:1883").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("10.0.0.5").unwrap(),
            ("10.0.0.5".to_string(), 1883)
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_mqtt_url("http://broker.local").is_err());
        assert!(parse_mqtt_url(":1883").is_err());
        assert!(parse_mqtt_url("host:port").is_err());
        assert!(parse_mqtt_url("a:1:2").is_err());
    }
}
