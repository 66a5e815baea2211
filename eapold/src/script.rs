//! Script execution
//!
//! Scripts run as forked children with a sanitised environment: a safe PATH
//! plus the `PKT_*` variables describing the frame being proxied. The child
//! inherits no file descriptor above stderr and has stdio pointed at the
//! null device before the exec. The parent waits synchronously; a script
//! failing is a warning, never a proxy error.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use eapold_capture::buffer::FrameBuffer;
use eapold_core::types::eapol;
use eapold_packet::eapol::{describe_code, describe_eap_type, describe_type};
use eapold_packet::view::PacketView;

const SAFE_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Build the `PKT_*` environment for a script from the packet view. The
/// ingress and current interface are passed as (name, MTU); the frame
/// buffer is borrowed to render and Base64-encode both the original and the
/// current frame.
pub fn build_env(
    pkt: &PacketView,
    orig_iface: (&str, u32),
    cur_iface: (&str, u32),
    buf: &mut FrameBuffer,
) -> Vec<(&'static str, String)> {
    let mut env: Vec<(&'static str, String)> = Vec::with_capacity(18);

    let elapsed = pkt.timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
    env.push((
        "PKT_TIME",
        format!("{}.{:06}", elapsed.as_secs(), elapsed.subsec_micros()),
    ));

    env.push(("PKT_DEST", pkt.dest.to_string()));
    env.push(("PKT_SOURCE", pkt.source.to_string()));

    let ty = pkt.eapol_type();
    env.push(("PKT_TYPE", ty.to_string()));
    env.push(("PKT_TYPE_DESC", describe_type(ty).to_string()));

    if ty == eapol::EAP_PACKET {
        if let Some(eap) = pkt.pdu.eap {
            env.push(("PKT_CODE", eap.code.to_string()));
            env.push(("PKT_CODE_DESC", describe_code(eap.code).to_string()));
            env.push(("PKT_ID", eap.id.to_string()));
            if let Some(rtype) = eap.rtype {
                env.push(("PKT_REQRESP_TYPE", rtype.to_string()));
                env.push(("PKT_REQRESP_DESC", describe_eap_type(rtype).to_string()));
            }
        }
    }

    env.push(("PKT_LENGTH_ORIG", pkt.len_orig.to_string()));
    let frame = buf.frame(pkt.dest, pkt.source, pkt.vlan_orig, pkt.len_orig);
    env.push(("PKT_ORIG", BASE64.encode(frame)));
    env.push(("PKT_IFACE_ORIG", orig_iface.0.to_string()));
    env.push(("PKT_IFACE_MTU_ORIG", orig_iface.1.to_string()));
    if let Some(tci) = pkt.vlan_orig {
        env.push(("PKT_DOT1Q_TCI_ORIG", format!("{:04x}", tci.to_u16())));
    }

    env.push(("PKT_LENGTH", pkt.len.to_string()));
    let frame = buf.frame(pkt.dest, pkt.source, pkt.vlan, pkt.len);
    env.push(("PKT", BASE64.encode(frame)));
    env.push(("PKT_IFACE", cur_iface.0.to_string()));
    env.push(("PKT_IFACE_MTU", cur_iface.1.to_string()));
    if let Some(tci) = pkt.vlan {
        env.push(("PKT_DOT1Q_TCI", format!("{:04x}", tci.to_u16())));
    }

    env
}

/// Fork and exec a script, then wait for it. The child's exit status is
/// reported as a warning when non-zero; nothing here can fail the proxy.
pub fn run(script: &Path, env: &[(&'static str, String)]) {
    let Ok(path) = CString::new(script.as_os_str().as_bytes()) else {
        warn!("script path '{}' contains a NUL byte", script.display());
        return;
    };

    let mut envp: Vec<CString> = Vec::with_capacity(env.len() + 1);
    for (key, value) in std::iter::once(&("PATH", SAFE_PATH.to_string())).chain(env.iter()) {
        match CString::new(format!("{key}={value}")) {
            Ok(entry) => envp.push(entry),
            Err(_) => warn!("skipping environment variable {key}: contains a NUL byte"),
        }
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        warn!(
            "never mind, cannot fork for script execution: {}",
            std::io::Error::last_os_error()
        );
        return;
    }

    if pid == 0 {
        // Child. The parent carries on without us, so errors past this
        // point end in _exit, never a return into the proxy.
        unsafe {
            libc::closelog();
            close_high_fds();
        }
        if crate::daemonize::redirect_stdio().is_err() {
            unsafe { libc::_exit(126) };
        }
        let argv = [path.as_ptr(), std::ptr::null()];
        let mut envp_ptrs: Vec<*const libc::c_char> = envp.iter().map(|e| e.as_ptr()).collect();
        envp_ptrs.push(std::ptr::null());
        unsafe {
            libc::execve(path.as_ptr(), argv.as_ptr(), envp_ptrs.as_ptr());
            libc::_exit(127);
        }
    }

    let mut status: libc::c_int = 0;
    if unsafe { libc::waitpid(pid, &mut status, 0) } == -1 {
        warn!(
            "cannot wait for script '{}': {}",
            script.display(),
            std::io::Error::last_os_error()
        );
        return;
    }

    if libc::WIFEXITED(status) {
        let code = libc::WEXITSTATUS(status);
        if code != 0 {
            warn!("script '{}' exited with status {}", script.display(), code);
        } else {
            debug!("script '{}' exited cleanly", script.display());
        }
    } else if libc::WIFSIGNALED(status) {
        warn!(
            "script '{}' terminated by signal {}",
            script.display(),
            libc::WTERMSIG(status)
        );
    }
}

/// Close every file descriptor above stderr
unsafe fn close_high_fds() {
    let max = libc::sysconf(libc::_SC_OPEN_MAX);
    let max = if max > 0 { max as libc::c_int } else { 1024 };
    for fd in 3..max {
        libc::close(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eapold_core::types::{MacAddr, Tci};
    use eapold_packet::eapol::EapolPdu;
    use std::time::Duration;

    const DEST: MacAddr = MacAddr::new([0x01, 0x80, 0xc2, 0x00, 0x00, 0x03]);
    const SOURCE: MacAddr = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn env_get<'a>(env: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        env.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    fn eap_response_identity_view(buf: &mut FrameBuffer) -> PacketView {
        // EtherType + EAP Response/Identity "user", id 152
        let wire = [
            0x88, 0x8e, 0x01, 0x00, 0x00, 0x09, 0x02, 152, 0x00, 0x09, 0x01, b'u', b's', b'e',
            b'r',
        ];
        buf.pdu_mut()[..wire.len()].copy_from_slice(&wire);

        PacketView {
            timestamp: UNIX_EPOCH + Duration::new(1700000000, 123_000),
            ingress: 0,
            current: 1,
            len: 27,
            len_orig: 27,
            dest: DEST,
            source: SOURCE,
            vlan: None,
            vlan_orig: None,
            pdu: EapolPdu::parse(&wire[2..]).unwrap(),
        }
    }

    #[test]
    fn test_env_for_eap_response_identity() {
        let mut buf = FrameBuffer::new(1500);
        let pkt = eap_response_identity_view(&mut buf);

        let env = build_env(&pkt, ("ifA", 1500), ("ifB", 1500), &mut buf);

        assert_eq!(env_get(&env, "PKT_TIME"), Some("1700000000.000123"));
        assert_eq!(env_get(&env, "PKT_DEST"), Some("01:80:c2:00:00:03"));
        assert_eq!(env_get(&env, "PKT_SOURCE"), Some("00:11:22:33:44:55"));
        assert_eq!(env_get(&env, "PKT_TYPE"), Some("0"));
        assert_eq!(env_get(&env, "PKT_TYPE_DESC"), Some("EAP-Packet"));
        assert_eq!(env_get(&env, "PKT_CODE"), Some("2"));
        assert_eq!(env_get(&env, "PKT_CODE_DESC"), Some("Response"));
        assert_eq!(env_get(&env, "PKT_ID"), Some("152"));
        assert_eq!(env_get(&env, "PKT_REQRESP_TYPE"), Some("1"));
        assert_eq!(env_get(&env, "PKT_REQRESP_DESC"), Some("Identity"));
        assert_eq!(env_get(&env, "PKT_IFACE_ORIG"), Some("ifA"));
        assert_eq!(env_get(&env, "PKT_IFACE_MTU_ORIG"), Some("1500"));
        assert_eq!(env_get(&env, "PKT_IFACE"), Some("ifB"));
        assert_eq!(env_get(&env, "PKT_LENGTH"), Some("27"));
        assert_eq!(env_get(&env, "PKT_DOT1Q_TCI"), None);
        assert_eq!(env_get(&env, "PKT_DOT1Q_TCI_ORIG"), None);
    }

    #[test]
    fn test_env_frame_decodes_to_wire_bytes() {
        let mut buf = FrameBuffer::new(1500);
        let pkt = eap_response_identity_view(&mut buf);

        let env = build_env(&pkt, ("ifA", 1500), ("ifB", 1500), &mut buf);

        let decoded = BASE64.decode(env_get(&env, "PKT").unwrap()).unwrap();
        let expected = buf.frame(pkt.dest, pkt.source, pkt.vlan, pkt.len).to_vec();
        assert_eq!(decoded, expected);
        assert_eq!(&decoded[0..6], DEST.as_bytes());
        assert_eq!(&decoded[12..14], &[0x88, 0x8e]);

        // Untagged and unrewritten, PKT and PKT_ORIG agree
        assert_eq!(env_get(&env, "PKT"), env_get(&env, "PKT_ORIG"));
    }

    #[test]
    fn test_env_tci_variables() {
        let mut buf = FrameBuffer::new(1500);
        let mut pkt = eap_response_identity_view(&mut buf);
        pkt.vlan_orig = Some(Tci::new(3, 0, 100));
        pkt.len_orig = 31;
        pkt.vlan = Some(Tci::new(5, 0, 10));
        pkt.len = 31;

        let env = build_env(&pkt, ("ifA", 1500), ("ifB", 1500), &mut buf);

        assert_eq!(env_get(&env, "PKT_DOT1Q_TCI_ORIG"), Some("6064"));
        assert_eq!(env_get(&env, "PKT_DOT1Q_TCI"), Some("a00a"));

        // The rendered current frame carries the rewritten tag on the wire
        let decoded = BASE64.decode(env_get(&env, "PKT").unwrap()).unwrap();
        assert_eq!(&decoded[12..16], &[0x81, 0x00, 0xa0, 0x0a]);
    }

    #[test]
    fn test_base64_vectors() {
        // Standard alphabet, '=' padding, no wrapping
        assert_eq!(BASE64.encode([0x01u8, 0x80, 0xc2]), "AYDC");
        assert_eq!(BASE64.encode([0x88u8, 0x8e]), "iI4=");
        assert_eq!(BASE64.encode([0x02u8]), "Ag==");

        let frame: Vec<u8> = (0..60).collect();
        let encoded = BASE64.encode(&frame);
        assert!(!encoded.contains('\n'));
        assert_eq!(BASE64.decode(&encoded).unwrap(), frame);
    }
}
