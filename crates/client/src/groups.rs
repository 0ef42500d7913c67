//! Group management.
//!
//! Groups form a tree. A node placed in a group subscribes its default
//! subscription models to the group and every ancestor, and points its
//! default publications at the group.

use crate::client::MeshClient;
use crate::configuration::subscription_ops;
use crate::error::MeshClientError;
use crate::pending::PendingKind;
use meshctl_core::{Action, Notification};
use meshctl_types::{classify, Address, Element, MeshDb, Node};
use tracing::{debug, info};

impl MeshClient {
    /// Create a group, optionally under `parent`.
    pub fn create_group(
        &mut self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Vec<Action>, MeshClientError> {
        if name.is_empty() {
            return Err(MeshClientError::InvalidArgs("empty group name".into()));
        }
        let db = self.db_ref()?;
        let parent = match parent {
            Some(parent) => Some(
                db.group_by_name(parent)
                    .ok_or_else(|| MeshClientError::NotFound(parent.to_string()))?
                    .address,
            ),
            None => None,
        };
        let address = self.db_mut()?.create_group(name, parent)?;
        info!(group = %address, name, "Group created");

        let mut actions = vec![];
        self.persist(&mut actions);
        if let (true, Some(proxy)) = (self.connected, self.proxy) {
            self.queue(proxy, PendingKind::ProxyFilterAdd(vec![address]));
            actions.push(Self::prime());
        }
        Ok(actions)
    }

    /// Delete a group.
    ///
    /// Members are unsubscribed and publications to the group move to its
    /// parent (or all-nodes). The record is removed once that is done.
    pub fn delete_group(&mut self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let group = db
            .group_by_name(name)
            .ok_or_else(|| MeshClientError::NotFound(name.to_string()))?;
        let address = group.address;
        let replacement = group.parent.unwrap_or(Address::ALL_NODES);
        self.require_idle()?;

        let mut ops = Vec::new();
        for node in db.nodes.iter().filter(|n| !n.blocked) {
            for kind in subscription_ops(node, &[address], false) {
                ops.push((node.unicast, kind));
            }
            for kind in retarget_publications(node.elements.iter(), &[address], replacement) {
                ops.push((node.unicast, kind));
            }
        }
        let needs_link = ops.iter().any(|(dst, _)| !self.is_local(*dst));
        if needs_link && !self.connected {
            return Err(MeshClientError::NotConnected);
        }

        info!(group = %address, name, ops = ops.len(), "Deleting group");
        if ops.is_empty() {
            if let Some(db) = self.db.as_mut() {
                db.remove_group(address);
            }
            let mut actions = vec![];
            self.persist(&mut actions);
            Self::notify(
                &mut actions,
                Notification::ConfigComplete {
                    target: None,
                    success: true,
                },
            );
            return Ok(actions);
        }
        if let (true, Some(proxy)) = (self.connected, self.proxy) {
            ops.push((proxy, PendingKind::ProxyFilterDelete(vec![address])));
        }
        self.group_deletion = Some(address);
        Ok(self.start_reconfiguration(None, ops))
    }

    /// Put a node (all its elements) or a single element into a group.
    pub fn add_to_group(&mut self, name: &str, group: &str) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let group_address = db
            .group_by_name(group)
            .ok_or_else(|| MeshClientError::NotFound(group.to_string()))?
            .address;
        let unicast = self.reconfigurable_node(name)?;
        let Some(db) = self.db.as_ref() else {
            return Err(MeshClientError::NetworkClosed);
        };
        let Some(node) = db.node(unicast) else {
            return Err(MeshClientError::NotFound(name.to_string()));
        };
        let scope = scope(db, node, name);

        let mut groups = vec![group_address];
        groups.extend(db.group_ancestors(group_address));
        let old_target = node.group.unwrap_or(Address::ALL_NODES);
        let mut kinds: Vec<PendingKind> = subscription_ops(node, &groups, true)
            .into_iter()
            .filter(|kind| in_scope(kind, &scope))
            .collect();
        kinds.extend(retarget_publications(
            node.elements.iter().filter(|e| scope.contains(&e.address)),
            &[old_target],
            group_address,
        ));
        let primary = scope.contains(&unicast);

        debug!(node = %unicast, group = %group_address, ops = kinds.len(), "Adding to group");
        if primary {
            if let Some(node) = self.db.as_mut().and_then(|db| db.node_mut(unicast)) {
                node.group = Some(group_address);
            }
            self.db_dirty = true;
        }
        self.finish_group_change(unicast, kinds)
    }

    /// Take a node (all its elements) or a single element out of a group.
    ///
    /// Subscriptions to ancestors still needed by the node's own group are
    /// kept.
    pub fn remove_from_group(
        &mut self,
        name: &str,
        group: &str,
    ) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let group_address = db
            .group_by_name(group)
            .ok_or_else(|| MeshClientError::NotFound(group.to_string()))?
            .address;
        let unicast = self.reconfigurable_node(name)?;
        let Some(db) = self.db.as_ref() else {
            return Err(MeshClientError::NetworkClosed);
        };
        let Some(node) = db.node(unicast) else {
            return Err(MeshClientError::NotFound(name.to_string()));
        };
        let scope = scope(db, node, name);
        let primary = scope.contains(&unicast);

        let remaining_group = match node.group {
            Some(g) if g == group_address && primary => None,
            other => other,
        };
        let keep: Vec<Address> = remaining_group
            .map(|g| {
                let mut chain = vec![g];
                chain.extend(db.group_ancestors(g));
                chain
            })
            .unwrap_or_default();
        let mut drop = vec![group_address];
        drop.extend(db.group_ancestors(group_address));
        drop.retain(|g| !keep.contains(g));

        let mut kinds: Vec<PendingKind> = subscription_ops(node, &drop, false)
            .into_iter()
            .filter(|kind| in_scope(kind, &scope))
            .collect();
        kinds.extend(retarget_publications(
            node.elements.iter().filter(|e| scope.contains(&e.address)),
            &[group_address],
            remaining_group.unwrap_or(Address::ALL_NODES),
        ));

        debug!(node = %unicast, group = %group_address, ops = kinds.len(), "Removing from group");
        if primary && node.group == Some(group_address) {
            if let Some(node) = self.db.as_mut().and_then(|db| db.node_mut(unicast)) {
                node.group = None;
            }
            self.db_dirty = true;
        }
        self.finish_group_change(unicast, kinds)
    }

    fn finish_group_change(
        &mut self,
        unicast: Address,
        kinds: Vec<PendingKind>,
    ) -> Result<Vec<Action>, MeshClientError> {
        if kinds.is_empty() {
            let mut actions = vec![];
            self.persist_if_dirty(&mut actions);
            Self::notify(
                &mut actions,
                Notification::ConfigComplete {
                    target: Some(unicast),
                    success: true,
                },
            );
            return Ok(actions);
        }
        Ok(self.start_reconfiguration(
            Some(unicast),
            kinds.into_iter().map(|kind| (unicast, kind)).collect(),
        ))
    }
}

/// Element addresses affected by a group change on `name`: the whole node
/// for a node name, otherwise the named element.
fn scope(db: &MeshDb, node: &Node, name: &str) -> Vec<Address> {
    match db.element_by_name(name) {
        Some(element) if db.node_by_name(name).is_none() => vec![element.address],
        _ => node.elements.iter().map(|e| e.address).collect(),
    }
}

fn in_scope(kind: &PendingKind, scope: &[Address]) -> bool {
    match kind {
        PendingKind::SubscriptionAdd { element, .. }
        | PendingKind::SubscriptionDelete { element, .. }
        | PendingKind::PublicationSet { element, .. } => scope.contains(element),
        _ => true,
    }
}

/// Publication changes moving non-core models that publish to any of `from`
/// over to `to`.
fn retarget_publications<'a>(
    elements: impl Iterator<Item = &'a Element>,
    from: &[Address],
    to: Address,
) -> Vec<PendingKind> {
    let mut ops = Vec::new();
    for element in elements {
        for model in &element.models {
            if classify(model.id).is_core() {
                continue;
            }
            let Some(publication) = model.publication else {
                continue;
            };
            if publication.address == to || !from.contains(&publication.address) {
                continue;
            }
            let mut publication = publication;
            publication.address = to;
            ops.push(PendingKind::PublicationSet {
                element: element.address,
                model: model.id,
                publication,
            });
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_test_helpers::test_node;
    use meshctl_types::models::{GENERIC_ONOFF_SERVER, LIGHT_LIGHTNESS_SERVER};
    use meshctl_types::{AppKeyIndex, ModelId, Publication, Retransmit};

    fn publishing(to: Address) -> Publication {
        Publication {
            address: to,
            app_key: AppKeyIndex(0),
            ttl: 7,
            period_ms: 0,
            retransmit: Retransmit::default(),
            friendship_credentials: false,
        }
    }

    #[test]
    fn test_retarget_only_matching_publications() {
        let mut node = test_node(
            5,
            0x0010,
            &[&[
                ModelId::Sig(GENERIC_ONOFF_SERVER),
                ModelId::Sig(LIGHT_LIGHTNESS_SERVER),
            ]],
        );
        node.elements[0].models[0].publication = Some(publishing(Address(0xC000)));
        node.elements[0].models[1].publication = Some(publishing(Address(0xC001)));

        let ops = retarget_publications(node.elements.iter(), &[Address(0xC000)], Address::ALL_NODES);
        assert_eq!(
            ops,
            vec![PendingKind::PublicationSet {
                element: Address(0x0010),
                model: ModelId::Sig(GENERIC_ONOFF_SERVER),
                publication: publishing(Address::ALL_NODES),
            }]
        );
    }

    #[test]
    fn test_scope_filter() {
        let sub = |element: u16| PendingKind::SubscriptionAdd {
            element: Address(element),
            address: Address(0xC000),
            model: ModelId::Sig(GENERIC_ONOFF_SERVER),
        };
        let scope = [Address(0x0011)];
        assert!(in_scope(&sub(0x0011), &scope));
        assert!(!in_scope(&sub(0x0010), &scope));
    }
}
