//! Netdevice ioctls: interface flags, MTU, and hardware address
//!
//! All queries go through a throwaway AF_INET datagram socket so they never
//! depend on the interface's raw socket being alive. Changing the hardware
//! address requires the interface to be down, so [`set_hardware_addr`] cycles
//! the link; the caller must expect the interface's raw sockets to turn
//! invalid afterwards.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::info;

use eapold_core::types::ETH_ALEN;
use eapold_core::{Error, MacAddr, Result};

fn ioctl_socket(name: &str) -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(Error::socket_errno(name));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn ifreq_for(name: &str) -> Result<libc::ifreq> {
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= ifr.ifr_name.len() {
        return Err(Error::interface(name, "name exceeds IFNAMSIZ"));
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr)
}

fn ifioctl(fd: &OwnedFd, request: libc::c_ulong, ifr: &mut libc::ifreq, name: &str) -> Result<()> {
    if unsafe { libc::ioctl(fd.as_raw_fd(), request, ifr as *mut libc::ifreq) } == -1 {
        return Err(Error::Socket {
            iface: name.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Read the interface flags (SIOCGIFFLAGS)
pub fn flags(name: &str) -> Result<libc::c_short> {
    let fd = ioctl_socket(name)?;
    let mut ifr = ifreq_for(name)?;
    ifioctl(&fd, libc::SIOCGIFFLAGS, &mut ifr, name)?;
    Ok(unsafe { ifr.ifr_ifru.ifru_flags })
}

/// Is the interface administratively up?
pub fn is_up(name: &str) -> Result<bool> {
    Ok(flags(name)? & libc::IFF_UP as libc::c_short != 0)
}

/// Read the interface MTU (SIOCGIFMTU)
pub fn mtu(name: &str) -> Result<u32> {
    let fd = ioctl_socket(name)?;
    let mut ifr = ifreq_for(name)?;
    ifioctl(&fd, libc::SIOCGIFMTU, &mut ifr, name)?;
    let mtu = unsafe { ifr.ifr_ifru.ifru_mtu };
    if mtu <= 0 {
        return Err(Error::interface(name, "reported a nonsensical MTU"));
    }
    Ok(mtu as u32)
}

/// Read the interface hardware address (SIOCGIFHWADDR). Fails unless the
/// interface is Ethernet.
pub fn hardware_addr(name: &str) -> Result<MacAddr> {
    let fd = ioctl_socket(name)?;
    let mut ifr = ifreq_for(name)?;
    ifioctl(&fd, libc::SIOCGIFHWADDR, &mut ifr, name)?;
    let hwaddr = unsafe { ifr.ifr_ifru.ifru_hwaddr };
    if hwaddr.sa_family != libc::ARPHRD_ETHER {
        return Err(Error::interface(name, "not Ethernet"));
    }
    let mut mac = [0u8; ETH_ALEN];
    for (dst, src) in mac.iter_mut().zip(hwaddr.sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(MacAddr::new(mac))
}

/// Set the interface hardware address, cycling the link while doing so.
///
/// Returns `Ok(false)` without touching the interface when the address
/// already matches; returns `Ok(true)` after a verified change. A `true`
/// result means the link went down and up again, which invalidates any raw
/// socket bound to the interface.
pub fn set_hardware_addr(name: &str, mac: MacAddr) -> Result<bool> {
    if hardware_addr(name)? == mac {
        return Ok(false);
    }

    let fd = ioctl_socket(name)?;

    let mut ifr = ifreq_for(name)?;
    ifioctl(&fd, libc::SIOCGIFFLAGS, &mut ifr, name)?;
    let up_flags = unsafe { ifr.ifr_ifru.ifru_flags };

    ifr.ifr_ifru.ifru_flags = up_flags & !(libc::IFF_UP as libc::c_short);
    ifioctl(&fd, libc::SIOCSIFFLAGS, &mut ifr, name)?;

    let mut ifr = ifreq_for(name)?;
    unsafe {
        ifr.ifr_ifru.ifru_hwaddr.sa_family = libc::ARPHRD_ETHER;
        for (dst, src) in ifr
            .ifr_ifru
            .ifru_hwaddr
            .sa_data
            .iter_mut()
            .zip(mac.as_bytes())
        {
            *dst = *src as libc::c_char;
        }
    }
    ifioctl(&fd, libc::SIOCSIFHWADDR, &mut ifr, name)?;

    let mut ifr = ifreq_for(name)?;
    ifr.ifr_ifru.ifru_flags = up_flags | libc::IFF_UP as libc::c_short;
    ifioctl(&fd, libc::SIOCSIFFLAGS, &mut ifr, name)?;

    if hardware_addr(name)? != mac {
        return Err(Error::interface(name, "cannot verify MAC after setting it"));
    }

    info!("set MAC to {}, interface '{}'", mac, name);
    Ok(true)
}
