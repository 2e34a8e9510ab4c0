//! Configurator implementations for DPC-port items (spec §3 "Port",
//! §4.A). Every Create/Modify/Delete shells out through the same
//! [`ShellExec`] seam the NI/ACL reconciler uses, so the whole control
//! loop owns exactly one privileged-command path (spec §9 "reconcile all
//! writes through a single owner task").

use std::sync::Arc;

use nim_dep_graph::{Configurator, ConfiguratorError, ConfiguratorResult, Dependency};
use nim_ni_acl::ShellExec;
use nim_shared_types::dpc::{DhcpMode, L2Kind};

use crate::types::{AddressValue, LinkValue, RouteValue};

fn downcast<'a, T: 'static>(value: &'a dyn nim_dep_graph::item::ItemValue, what: &str) -> ConfiguratorResult<&'a T> {
    value
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ConfiguratorError::new(format!("{what}: unexpected item value type")))
}

fn vecs<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

pub struct LinkConfigurator {
    exec: Arc<dyn ShellExec>,
}

impl LinkConfigurator {
    pub fn new(exec: Arc<dyn ShellExec>) -> Self {
        Self { exec }
    }
}

impl Configurator for LinkConfigurator {
    fn create(&self, name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        let v: &LinkValue = downcast(value, name)?;
        match &v.l2_kind {
            L2Kind::Plain => {
                self.exec.run("ip", &vecs(["link", "set", "dev", &v.if_name, "up"]))?;
            }
            L2Kind::Vlan { parent, tag } => {
                self.exec.run(
                    "ip",
                    &vecs([
                        "link", "add", "link", parent, "name", &v.if_name, "type", "vlan", "id",
                    ])
                    .into_iter()
                    .chain(std::iter::once(tag.to_string()))
                    .collect::<Vec<_>>(),
                )?;
                self.exec.run("ip", &vecs(["link", "set", "dev", &v.if_name, "up"]))?;
            }
            L2Kind::Bond { slaves } => {
                self.exec
                    .run("ip", &vecs(["link", "add", "name", &v.if_name, "type", "bond"]))?;
                for slave in slaves {
                    self.exec.run("ip", &[
                        "link".to_string(),
                        "set".to_string(),
                        "dev".to_string(),
                        slave.clone(),
                        "master".to_string(),
                        v.if_name.clone(),
                    ])?;
                }
                self.exec.run("ip", &vecs(["link", "set", "dev", &v.if_name, "up"]))?;
            }
        }
        Ok(())
    }

    fn modify(&self, name: &str, old: &dyn nim_dep_graph::item::ItemValue, new: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        self.delete(name, old)?;
        self.create(name, new)
    }

    fn delete(&self, _name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        let v: &LinkValue = downcast(value, "dpc link delete")?;
        self.exec.run("ip", &vecs(["link", "set", "dev", &v.if_name, "down"]))?;
        match &v.l2_kind {
            // A physical NIC is never removed, only brought down; vlans and
            // bonds are synthetic links this agent created and owns.
            L2Kind::Plain => Ok(()),
            L2Kind::Vlan { .. } | L2Kind::Bond { .. } => {
                self.exec.run("ip", &vecs(["link", "delete", "dev", &v.if_name]))
            }
        }
    }

    fn needs_recreate(&self, old: &dyn nim_dep_graph::item::ItemValue, new: &dyn nim_dep_graph::item::ItemValue) -> bool {
        match (old.as_any().downcast_ref::<LinkValue>(), new.as_any().downcast_ref::<LinkValue>()) {
            (Some(o), Some(n)) => o.l2_kind != n.l2_kind,
            _ => true,
        }
    }

    fn depends_on(&self, _name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> Vec<Dependency> {
        match value.as_any().downcast_ref::<LinkValue>() {
            Some(LinkValue { l2_kind: L2Kind::Vlan { parent, .. }, .. }) => {
                vec![Dependency::on(crate::types::link_item_name(parent))]
            }
            Some(LinkValue { l2_kind: L2Kind::Bond { slaves }, .. }) => slaves
                .iter()
                .map(|s| Dependency::on(crate::types::link_item_name(s)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub struct AddressConfigurator {
    exec: Arc<dyn ShellExec>,
}

impl AddressConfigurator {
    pub fn new(exec: Arc<dyn ShellExec>) -> Self {
        Self { exec }
    }
}

impl Configurator for AddressConfigurator {
    fn create(&self, name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        let v: &AddressValue = downcast(value, name)?;
        match v.dhcp_mode {
            DhcpMode::Static => {
                for addr in &v.addresses {
                    self.exec
                        .run("ip", &vecs(["addr", "add", &addr.to_string(), "dev", &v.if_name]))?;
                }
                Ok(())
            }
            DhcpMode::Client => self.exec.run(
                "dhclient",
                &vecs(["-pf", &format!("/run/dhclient.{}.pid", v.if_name), &v.if_name]),
            ),
            DhcpMode::None => Ok(()),
        }
    }

    fn modify(&self, name: &str, old: &dyn nim_dep_graph::item::ItemValue, new: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        self.delete(name, old)?;
        self.create(name, new)
    }

    fn delete(&self, _name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        let v: &AddressValue = downcast(value, "dpc address delete")?;
        match v.dhcp_mode {
            DhcpMode::Static => {
                for addr in &v.addresses {
                    self.exec
                        .run("ip", &vecs(["addr", "del", &addr.to_string(), "dev", &v.if_name]))?;
                }
                Ok(())
            }
            DhcpMode::Client => self.exec.run(
                "dhclient",
                &vecs(["-r", "-pf", &format!("/run/dhclient.{}.pid", v.if_name), &v.if_name]),
            ),
            DhcpMode::None => Ok(()),
        }
    }

    fn depends_on(&self, _name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> Vec<Dependency> {
        match value.as_any().downcast_ref::<AddressValue>() {
            Some(v) => vec![Dependency::on(crate::types::link_item_name(&v.if_name))],
            None => Vec::new(),
        }
    }
}

pub struct RouteConfigurator {
    exec: Arc<dyn ShellExec>,
}

impl RouteConfigurator {
    pub fn new(exec: Arc<dyn ShellExec>) -> Self {
        Self { exec }
    }
}

impl Configurator for RouteConfigurator {
    fn create(&self, name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        let v: &RouteValue = downcast(value, name)?;
        self.exec.run(
            "ip",
            &vecs(["route", "replace", "default", "via", &v.gateway.addr.to_string(), "dev", &v.if_name]),
        )
    }

    fn modify(&self, name: &str, _old: &dyn nim_dep_graph::item::ItemValue, new: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        self.create(name, new)
    }

    fn delete(&self, _name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> ConfiguratorResult<()> {
        let v: &RouteValue = downcast(value, "dpc route delete")?;
        self.exec.run("ip", &vecs(["route", "del", "default", "dev", &v.if_name]))
    }

    fn depends_on(&self, _name: &str, value: &dyn nim_dep_graph::item::ItemValue) -> Vec<Dependency> {
        match value.as_any().downcast_ref::<RouteValue>() {
            Some(v) => vec![Dependency::on(crate::types::address_item_name(&v.if_name))],
            None => Vec::new(),
        }
    }
}
