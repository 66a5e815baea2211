//! Configuration model
//!
//! The config file is declarative TOML. Each `[[iface]]` table declares one
//! proxied interface together with its ingress/egress policy:
//!
//! ```toml
//! [[iface]]
//! name = "eth0"
//! promiscuous = true
//!
//! [iface.ingress]
//! filter = ["logoff"]
//!
//! [iface.ingress.exec]
//! success = "/usr/local/sbin/on-success.sh"
//!
//! [[iface]]
//! name = "eth1"
//! set-mac-from = "eth0"
//!
//! [iface.egress.dot1q]
//! priority = 5
//! id = 10
//! ```
//!
//! `dot1q = false` strips any tag on egress; a `[iface.egress.dot1q]` table
//! rewrites it, with omitted fields preserved from the received frame.
//!
//! Loading produces the validated in-memory model consumed by the interface
//! table; all structural rules (at least two interfaces, unique names, MAC
//! directive exclusivity, value bounds, script executability) are enforced
//! here, at load time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::eapol;
use crate::{Error, MacAddr, Result};

/// Filter masks for EAPOL Packet Types and EAP Codes.
///
/// A set bit means the corresponding classification is dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterMask {
    types: u16,
    codes: u8,
}

impl FilterMask {
    /// Mark an EAPOL Packet Type as dropped
    pub fn set_type(&mut self, ty: u8) {
        self.types |= 1 << ty;
    }

    /// Mark an EAP Code as dropped
    pub fn set_code(&mut self, code: u8) {
        self.codes |= 1 << code;
    }

    /// Mark all standardised EAPOL Packet Types as dropped
    pub fn set_all_types(&mut self) {
        for ty in 0..eapol::TYPE_COUNT as u8 {
            self.set_type(ty);
        }
    }

    /// Does the mask drop this EAPOL Packet Type?
    pub fn drops_type(&self, ty: u8) -> bool {
        ty < 16 && self.types & (1 << ty) != 0
    }

    /// Does the mask drop this EAP Code?
    pub fn drops_code(&self, code: u8) -> bool {
        code < 8 && self.codes & (1 << code) != 0
    }

    /// Combined verdict: drop iff the Type bit is set, or the frame is an
    /// EAP-Packet and the Code bit is set.
    pub fn drops(&self, ty: u8, code: Option<u8>) -> bool {
        if self.drops_type(ty) {
            return true;
        }
        match code {
            Some(code) if ty == eapol::EAP_PACKET => self.drops_code(code),
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types == 0 && self.codes == 0
    }
}

/// Which classification selected an action script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKey {
    /// Selected by EAPOL Packet Type
    Type(u8),
    /// Selected by EAP Code
    Code(u8),
}

/// Scripts to execute per EAPOL Packet Type or EAP Code
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    by_type: [Option<PathBuf>; eapol::TYPE_COUNT],
    by_code: [Option<PathBuf>; eapol::CODE_COUNT],
}

impl ActionTable {
    pub fn set_type(&mut self, ty: u8, path: PathBuf) {
        self.by_type[ty as usize] = Some(path);
    }

    pub fn set_code(&mut self, code: u8, path: PathBuf) {
        self.by_code[code as usize] = Some(path);
    }

    /// Select the script for a classification. The by-Type entry wins; the
    /// by-Code entry applies only to EAP-Packet frames.
    pub fn select(&self, ty: u8, code: Option<u8>) -> Option<(&Path, ActionKey)> {
        if (ty as usize) < eapol::TYPE_COUNT {
            if let Some(path) = self.by_type[ty as usize].as_deref() {
                return Some((path, ActionKey::Type(ty)));
            }
        }
        if ty == eapol::EAP_PACKET {
            if let Some(code) = code {
                if (code as usize) < eapol::CODE_COUNT {
                    if let Some(path) = self.by_code[code as usize].as_deref() {
                        return Some((path, ActionKey::Code(code)));
                    }
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.iter().all(Option::is_none) && self.by_code.iter().all(Option::is_none)
    }

    fn scripts(&self) -> impl Iterator<Item = &Path> {
        self.by_type
            .iter()
            .chain(self.by_code.iter())
            .filter_map(|p| p.as_deref())
    }
}

/// Per-egress-interface 802.1Q tag directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TciDirective {
    /// Remove any 802.1Q tag
    Strip,
    /// Ensure a tag is present; `None` fields preserve the received value
    /// (zero when the received frame was untagged)
    Rewrite {
        pcp: Option<u8>,
        dei: Option<u8>,
        vid: Option<u16>,
    },
}

/// Ingress-side policy for one interface
#[derive(Debug, Clone, Default)]
pub struct IngressPolicy {
    pub filter: Option<FilterMask>,
    pub action: Option<ActionTable>,
}

/// Egress-side policy for one interface
#[derive(Debug, Clone, Default)]
pub struct EgressPolicy {
    pub tci: Option<TciDirective>,
    pub filter: Option<FilterMask>,
    pub action: Option<ActionTable>,
}

/// One configured interface
#[derive(Debug, Clone)]
pub struct IfaceConfig {
    pub name: String,
    pub promiscuous: bool,
    /// Static MAC to set at startup; exclusive with `set_mac_from`
    pub set_mac: Option<MacAddr>,
    /// Name of another configured interface whose first received frame
    /// supplies this interface's MAC
    pub set_mac_from: Option<String>,
    pub ingress: Option<IngressPolicy>,
    pub egress: Option<EgressPolicy>,
}

/// The validated configuration: an ordered list of interfaces
#[derive(Debug, Clone)]
pub struct Config {
    pub ifaces: Vec<IfaceConfig>,
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file '{}': {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Parse and validate config text
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| Error::config(format!("cannot parse config: {e}")))?;
        let config = Self::build(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn build(raw: RawConfig) -> Result<Self> {
        let mut ifaces = Vec::with_capacity(raw.ifaces.len());
        for iface in raw.ifaces {
            let set_mac = match &iface.set_mac {
                Some(s) => Some(s.parse::<MacAddr>()?),
                None => None,
            };
            if set_mac.is_some() && iface.set_mac_from.is_some() {
                return Err(Error::config(format!(
                    "interface '{}': set-mac and set-mac-from are mutually exclusive",
                    iface.name
                )));
            }
            let ingress = match iface.ingress {
                Some(raw) => Some(build_ingress(&iface.name, raw)?),
                None => None,
            };
            let egress = match iface.egress {
                Some(raw) => Some(build_egress(&iface.name, raw)?),
                None => None,
            };
            ifaces.push(IfaceConfig {
                name: iface.name,
                promiscuous: iface.promiscuous,
                set_mac,
                set_mac_from: iface.set_mac_from,
                ingress,
                egress,
            });
        }
        Ok(Config { ifaces })
    }

    fn validate(&self) -> Result<()> {
        if self.ifaces.len() < 2 {
            return Err(Error::config(format!(
                "need at least 2 interfaces, got {}",
                self.ifaces.len()
            )));
        }
        for (i, iface) in self.ifaces.iter().enumerate() {
            if iface.name.is_empty() || iface.name.len() >= IFNAMSIZ {
                return Err(Error::config(format!(
                    "invalid interface name '{}'",
                    iface.name
                )));
            }
            if self.ifaces[..i].iter().any(|other| other.name == iface.name) {
                return Err(Error::config(format!(
                    "interface '{}' declared more than once",
                    iface.name
                )));
            }
            if let Some(from) = &iface.set_mac_from {
                if *from == iface.name {
                    return Err(Error::config(format!(
                        "interface '{}': set-mac-from must name another interface",
                        iface.name
                    )));
                }
                if !self.ifaces.iter().any(|other| &other.name == from) {
                    return Err(Error::config(format!(
                        "interface '{}': set-mac-from target '{from}' is not configured",
                        iface.name
                    )));
                }
            }
            for table in [
                iface.ingress.as_ref().and_then(|p| p.action.as_ref()),
                iface.egress.as_ref().and_then(|p| p.action.as_ref()),
            ]
            .into_iter()
            .flatten()
            {
                for script in table.scripts() {
                    check_script(script)?;
                }
            }
        }
        Ok(())
    }
}

/// Linux interface name limit, including the terminating NUL
const IFNAMSIZ: usize = 16;

fn build_filter(iface: &str, tokens: &[String]) -> Result<FilterMask> {
    let mut mask = FilterMask::default();
    for token in tokens {
        if token == "all" {
            mask.set_all_types();
        } else if let Some(ty) = type_for_token(token) {
            mask.set_type(ty);
        } else if let Some(code) = code_for_token(token) {
            mask.set_code(code);
        } else {
            return Err(Error::config(format!(
                "interface '{iface}': unknown filter token '{token}'"
            )));
        }
    }
    Ok(mask)
}

fn build_actions(iface: &str, entries: BTreeMap<String, PathBuf>) -> Result<ActionTable> {
    let mut table = ActionTable::default();
    for (token, path) in entries {
        if let Some(ty) = type_for_token(&token) {
            table.set_type(ty, path);
        } else if let Some(code) = code_for_token(&token) {
            table.set_code(code, path);
        } else {
            return Err(Error::config(format!(
                "interface '{iface}': unknown exec token '{token}'"
            )));
        }
    }
    Ok(table)
}

fn build_ingress(iface: &str, raw: RawIngress) -> Result<IngressPolicy> {
    Ok(IngressPolicy {
        filter: match raw.filter {
            Some(tokens) => Some(build_filter(iface, &tokens)?),
            None => None,
        },
        action: match raw.exec {
            Some(entries) => Some(build_actions(iface, entries)?),
            None => None,
        },
    })
}

fn build_egress(iface: &str, raw: RawEgress) -> Result<EgressPolicy> {
    let tci = match raw.dot1q {
        Some(RawDot1q::Toggle(false)) => Some(TciDirective::Strip),
        Some(RawDot1q::Toggle(true)) => Some(TciDirective::Rewrite {
            pcp: None,
            dei: None,
            vid: None,
        }),
        Some(RawDot1q::Fields(tci)) => {
            if let Some(pcp) = tci.priority {
                if pcp > 7 {
                    return Err(Error::config(format!(
                        "interface '{iface}': dot1q priority {pcp} out of range 0-7"
                    )));
                }
            }
            if let Some(dei) = tci.drop_eligible {
                if dei > 1 {
                    return Err(Error::config(format!(
                        "interface '{iface}': dot1q drop-eligible {dei} out of range 0-1"
                    )));
                }
            }
            if let Some(vid) = tci.id {
                if vid > 4094 {
                    return Err(Error::config(format!(
                        "interface '{iface}': dot1q id {vid} out of range 0-4094"
                    )));
                }
            }
            Some(TciDirective::Rewrite {
                pcp: tci.priority,
                dei: tci.drop_eligible,
                vid: tci.id,
            })
        }
        None => None,
    };
    Ok(EgressPolicy {
        tci,
        filter: match raw.filter {
            Some(tokens) => Some(build_filter(iface, &tokens)?),
            None => None,
        },
        action: match raw.exec {
            Some(entries) => Some(build_actions(iface, entries)?),
            None => None,
        },
    })
}

fn type_for_token(token: &str) -> Option<u8> {
    match token {
        "eap" => Some(eapol::EAP_PACKET),
        "start" => Some(eapol::START),
        "logoff" => Some(eapol::LOGOFF),
        "key" => Some(eapol::KEY),
        "encapsulated-asf-alert" => Some(eapol::ENCAP_ASF_ALERT),
        "mka" => Some(eapol::MKA),
        "announcement-generic" => Some(eapol::ANNOUNCEMENT_GENERIC),
        "announcement-specific" => Some(eapol::ANNOUNCEMENT_SPECIFIC),
        "announcement-req" => Some(eapol::ANNOUNCEMENT_REQ),
        _ => None,
    }
}

fn code_for_token(token: &str) -> Option<u8> {
    match token {
        "request" => Some(eapol::CODE_REQUEST),
        "response" => Some(eapol::CODE_RESPONSE),
        "success" => Some(eapol::CODE_SUCCESS),
        "failure" => Some(eapol::CODE_FAILURE),
        _ => None,
    }
}

/// Scripts must be absolute, canonical, and executable at load time.
fn check_script(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::config(format!(
            "script path '{}' is not absolute",
            path.display()
        )));
    }
    let canonical = fs::canonicalize(path).map_err(|e| {
        Error::config(format!("cannot resolve script '{}': {e}", path.display()))
    })?;
    if canonical != path {
        return Err(Error::config(format!(
            "script path '{}' is not canonical (resolves to '{}')",
            path.display(),
            canonical.display()
        )));
    }
    let metadata = fs::metadata(path)
        .map_err(|e| Error::config(format!("cannot stat script '{}': {e}", path.display())))?;
    let executable = {
        use std::os::unix::fs::PermissionsExt;
        metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
    };
    if !executable {
        return Err(Error::config(format!(
            "script '{}' is not executable",
            path.display()
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default, rename = "iface")]
    ifaces: Vec<RawIface>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIface {
    name: String,
    #[serde(default)]
    promiscuous: bool,
    #[serde(default, rename = "set-mac")]
    set_mac: Option<String>,
    #[serde(default, rename = "set-mac-from")]
    set_mac_from: Option<String>,
    #[serde(default)]
    ingress: Option<RawIngress>,
    #[serde(default)]
    egress: Option<RawEgress>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIngress {
    #[serde(default)]
    filter: Option<Vec<String>>,
    #[serde(default)]
    exec: Option<BTreeMap<String, PathBuf>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEgress {
    #[serde(default)]
    dot1q: Option<RawDot1q>,
    #[serde(default)]
    filter: Option<Vec<String>>,
    #[serde(default)]
    exec: Option<BTreeMap<String, PathBuf>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDot1q {
    Toggle(bool),
    Fields(RawTci),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTci {
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default, rename = "drop-eligible")]
    drop_eligible: Option<u8>,
    #[serde(default)]
    id: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[iface]]
        name = "eth0"

        [[iface]]
        name = "eth1"
    "#;

    #[test]
    fn test_minimal_config() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.ifaces.len(), 2);
        assert_eq!(config.ifaces[0].name, "eth0");
        assert!(!config.ifaces[0].promiscuous);
        assert!(config.ifaces[0].ingress.is_none());
    }

    #[test]
    fn test_rejects_single_iface() {
        let text = r#"
            [[iface]]
            name = "eth0"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_rejects_empty_config() {
        assert!(Config::parse("").is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [[iface]]
            name = "eth0"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_rejects_both_mac_directives() {
        let text = r#"
            [[iface]]
            name = "eth0"
            set-mac = "02:00:00:00:00:01"
            set-mac-from = "eth1"

            [[iface]]
            name = "eth1"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_rejects_self_mac_learn() {
        let text = r#"
            [[iface]]
            name = "eth0"
            set-mac-from = "eth0"

            [[iface]]
            name = "eth1"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_rejects_unknown_mac_learn_target() {
        let text = r#"
            [[iface]]
            name = "eth0"
            set-mac-from = "eth7"

            [[iface]]
            name = "eth1"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_accepts_mac_learn() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [[iface]]
            name = "eth1"
            set-mac-from = "eth0"
        "#;
        let config = Config::parse(text).unwrap();
        assert_eq!(config.ifaces[1].set_mac_from.as_deref(), Some("eth0"));
    }

    #[test]
    fn test_static_mac() {
        let text = r#"
            [[iface]]
            name = "eth0"
            set-mac = "02:ab:cd:ef:00:01"

            [[iface]]
            name = "eth1"
        "#;
        let config = Config::parse(text).unwrap();
        assert_eq!(
            config.ifaces[0].set_mac,
            Some(MacAddr::new([0x02, 0xab, 0xcd, 0xef, 0x00, 0x01]))
        );
    }

    #[test]
    fn test_rejects_bad_mac() {
        let text = r#"
            [[iface]]
            name = "eth0"
            set-mac = "02:ab:cd"

            [[iface]]
            name = "eth1"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_filter_tokens() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [iface.ingress]
            filter = ["logoff", "success"]

            [[iface]]
            name = "eth1"
        "#;
        let config = Config::parse(text).unwrap();
        let mask = config.ifaces[0].ingress.as_ref().unwrap().filter.unwrap();
        assert!(mask.drops_type(eapol::LOGOFF));
        assert!(!mask.drops_type(eapol::START));
        assert!(mask.drops(eapol::EAP_PACKET, Some(eapol::CODE_SUCCESS)));
        assert!(!mask.drops(eapol::EAP_PACKET, Some(eapol::CODE_FAILURE)));
        // Code bits only apply to EAP-Packet frames
        assert!(!mask.drops(eapol::START, Some(eapol::CODE_SUCCESS)));
    }

    #[test]
    fn test_filter_all() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [iface.ingress]
            filter = ["all"]

            [[iface]]
            name = "eth1"
        "#;
        let config = Config::parse(text).unwrap();
        let mask = config.ifaces[0].ingress.as_ref().unwrap().filter.unwrap();
        for ty in 0..eapol::TYPE_COUNT as u8 {
            assert!(mask.drops_type(ty));
        }
    }

    #[test]
    fn test_rejects_unknown_filter_token() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [iface.ingress]
            filter = ["bogus"]

            [[iface]]
            name = "eth1"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_dot1q_strip() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [iface.egress]
            dot1q = false

            [[iface]]
            name = "eth1"
        "#;
        let config = Config::parse(text).unwrap();
        let egress = config.ifaces[0].egress.as_ref().unwrap();
        assert_eq!(egress.tci, Some(TciDirective::Strip));
    }

    #[test]
    fn test_dot1q_rewrite() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [iface.egress.dot1q]
            priority = 5
            id = 10

            [[iface]]
            name = "eth1"
        "#;
        let config = Config::parse(text).unwrap();
        let egress = config.ifaces[0].egress.as_ref().unwrap();
        assert_eq!(
            egress.tci,
            Some(TciDirective::Rewrite {
                pcp: Some(5),
                dei: None,
                vid: Some(10),
            })
        );
    }

    #[test]
    fn test_dot1q_bounds() {
        for (field, value) in [("priority", 8), ("drop-eligible", 2), ("id", 4095)] {
            let text = format!(
                r#"
                [[iface]]
                name = "eth0"

                [iface.egress.dot1q]
                {field} = {value}

                [[iface]]
                name = "eth1"
                "#
            );
            assert!(Config::parse(&text).is_err(), "{field} = {value} accepted");
        }
    }

    #[test]
    fn test_rejects_missing_script() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [iface.ingress.exec]
            success = "/nonexistent/script.sh"

            [[iface]]
            name = "eth1"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_rejects_relative_script() {
        let text = r#"
            [[iface]]
            name = "eth0"

            [iface.ingress.exec]
            success = "script.sh"

            [[iface]]
            name = "eth1"
        "#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_accepts_executable_script() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = fs::canonicalize(std::env::temp_dir()).unwrap();
        let path = dir.join("eapold-config-test-script.sh");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        drop(file);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let text = format!(
            r#"
            [[iface]]
            name = "eth0"

            [iface.ingress.exec]
            success = "{}"

            [[iface]]
            name = "eth1"
            "#,
            path.display()
        );
        let config = Config::parse(&text).unwrap();
        let table = config.ifaces[0]
            .ingress
            .as_ref()
            .unwrap()
            .action
            .as_ref()
            .unwrap();
        let (selected, key) = table
            .select(eapol::EAP_PACKET, Some(eapol::CODE_SUCCESS))
            .unwrap();
        assert_eq!(selected, path.as_path());
        assert_eq!(key, ActionKey::Code(eapol::CODE_SUCCESS));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_action_type_beats_code() {
        let mut table = ActionTable::default();
        table.set_type(eapol::EAP_PACKET, PathBuf::from("/by/type.sh"));
        table.set_code(eapol::CODE_SUCCESS, PathBuf::from("/by/code.sh"));

        let (path, key) = table
            .select(eapol::EAP_PACKET, Some(eapol::CODE_SUCCESS))
            .unwrap();
        assert_eq!(path, Path::new("/by/type.sh"));
        assert_eq!(key, ActionKey::Type(eapol::EAP_PACKET));
    }

    #[test]
    fn test_action_code_only_for_eap() {
        let mut table = ActionTable::default();
        table.set_code(eapol::CODE_SUCCESS, PathBuf::from("/by/code.sh"));

        assert!(table
            .select(eapol::START, Some(eapol::CODE_SUCCESS))
            .is_none());
        assert!(table
            .select(eapol::EAP_PACKET, Some(eapol::CODE_SUCCESS))
            .is_some());
    }
}
