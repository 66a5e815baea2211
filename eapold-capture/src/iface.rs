//! The interface table
//!
//! An ordered collection of the configured interfaces, each carrying its
//! runtime state: kernel index, discovered MTU, the raw socket, traffic
//! counters, policy, and the one-shot MAC intents. The table is built once
//! from the validated config and owned by the event loop; `initialise` is
//! called at startup and again after every proxy restart.

use tracing::{debug, error, warn};

use eapold_core::config::{Config, EgressPolicy, IngressPolicy};
use eapold_core::{Error, MacAddr, Result};

use crate::netdev;
use crate::sock::RawSocket;

/// One configured interface and its runtime state
pub struct Iface {
    pub name: String,
    /// Kernel interface index
    pub index: u32,
    /// MTU, discovered at initialisation
    pub mtu: u32,
    /// The raw socket; `None` until initialised and between restarts
    pub socket: Option<RawSocket>,
    /// EAPOL frames received on this interface
    pub recv_ctr: u64,
    /// EAPOL frames sent on this interface
    pub send_ctr: u64,
    pub ingress: Option<IngressPolicy>,
    pub egress: Option<EgressPolicy>,
    pub promiscuous: bool,
    /// Static MAC to apply at first initialisation; consumed exactly once
    set_mac: Option<MacAddr>,
    /// Kernel index of the interface whose first received frame supplies
    /// this interface's MAC; consumed exactly once
    pub learn_mac_from: Option<u32>,
}

/// The ordered interface table
pub struct IfaceTable {
    ifaces: Vec<Iface>,
}

impl IfaceTable {
    /// Resolve the configured interfaces against the system and build the
    /// table. Fails when an interface does not exist.
    pub fn from_config(config: &Config) -> Result<Self> {
        let system = pnet_datalink::interfaces();

        let mut ifaces = Vec::with_capacity(config.ifaces.len());
        for ic in &config.ifaces {
            let sys = system
                .iter()
                .find(|sys| sys.name == ic.name)
                .ok_or_else(|| Error::InterfaceNotFound(ic.name.clone()))?;
            ifaces.push(Iface {
                name: ic.name.clone(),
                index: sys.index,
                mtu: 0,
                socket: None,
                recv_ctr: 0,
                send_ctr: 0,
                ingress: ic.ingress.clone(),
                egress: ic.egress.clone(),
                promiscuous: ic.promiscuous,
                set_mac: ic.set_mac,
                learn_mac_from: None,
            });
        }

        // Resolve learn sources once every index is known
        for (i, ic) in config.ifaces.iter().enumerate() {
            if let Some(from) = &ic.set_mac_from {
                let index = ifaces
                    .iter()
                    .find(|other| &other.name == from)
                    .map(|other| other.index)
                    .ok_or_else(|| {
                        Error::config(format!(
                            "interface '{}': set-mac-from target '{from}' is not configured",
                            ic.name
                        ))
                    })?;
                ifaces[i].learn_mac_from = Some(index);
            }
        }

        Ok(Self { ifaces })
    }

    pub fn len(&self) -> usize {
        self.ifaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ifaces.is_empty()
    }

    pub fn get(&self, pos: usize) -> &Iface {
        &self.ifaces[pos]
    }

    pub fn get_mut(&mut self, pos: usize) -> &mut Iface {
        &mut self.ifaces[pos]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Iface> {
        self.ifaces.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Iface> {
        self.ifaces.iter_mut()
    }

    /// Highest MTU across the table; only meaningful after `initialise`
    pub fn max_mtu(&self) -> u32 {
        let mtu = self.ifaces.iter().map(|i| i.mtu).max().unwrap_or(0);
        if mtu == 0 {
            1500
        } else {
            mtu
        }
    }

    /// (Re)initialise every interface: close any previous socket, validate
    /// interface state, discover the MTU, apply the pending static MAC, and
    /// open the raw socket. Returns the number of interfaces that are ready.
    pub fn initialise(&mut self) -> usize {
        let mut ready = 0;
        for iface in &mut self.ifaces {
            debug!("initialize interface '{}', index {}", iface.name, iface.index);
            iface.socket = None;
            match bring_up(iface) {
                Ok(()) => ready += 1,
                Err(e) => error!("cannot initialise: {e}"),
            }
        }
        ready
    }
}

fn bring_up(iface: &mut Iface) -> Result<()> {
    if !netdev::is_up(&iface.name)? {
        return Err(Error::interface(iface.name.as_str(), "not up"));
    }
    iface.mtu = netdev::mtu(&iface.name)?;
    // Verifies the interface is Ethernet before anything else touches it
    netdev::hardware_addr(&iface.name)?;

    if let Some(mac) = iface.set_mac.take() {
        if let Err(e) = netdev::set_hardware_addr(&iface.name, mac) {
            warn!("{e}; continuing, won't attempt that again");
        }
    }

    iface.socket = Some(RawSocket::open(
        &iface.name,
        iface.index,
        iface.promiscuous,
    )?);
    Ok(())
}
