//! Application model access: generic, lighting, sensor, health and vendor
//! messages.
//!
//! These bypass the pending queue. Acknowledged messages to a unicast
//! destination ask the transport for a reply; the status surfaces as
//! [`Notification::ModelState`](meshctl_core::Notification::ModelState).

use crate::client::MeshClient;
use crate::error::MeshClientError;
use crate::resolver::model_destination;
use meshctl_core::{Action, OutboundMessage, SecurityKey};
use meshctl_messages::{ModelRequest, Transition};
use meshctl_types::models::{
    GENERIC_LEVEL_SERVER, GENERIC_ONOFF_SERVER, HEALTH_SERVER, LIGHT_CTL_SERVER,
    LIGHT_HSL_SERVER, LIGHT_LIGHTNESS_SERVER, SENSOR_SERVER,
};
use meshctl_types::{AppKeyIndex, ModelId};
use tracing::debug;

impl MeshClient {
    // ═══════════════════════════════════════════════════════════════════════
    // Generic OnOff / Level
    // ═══════════════════════════════════════════════════════════════════════

    pub fn onoff_get(&mut self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        self.model_send(name, ModelId::Sig(GENERIC_ONOFF_SERVER), ModelRequest::OnOffGet, true)
    }

    pub fn onoff_set(
        &mut self,
        name: &str,
        on: bool,
        transition: Option<Transition>,
        ack: bool,
    ) -> Result<Vec<Action>, MeshClientError> {
        let tid = self.next_tid();
        self.model_send(
            name,
            ModelId::Sig(GENERIC_ONOFF_SERVER),
            ModelRequest::OnOffSet { on, tid, transition },
            ack,
        )
    }

    pub fn level_get(&mut self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        self.model_send(name, ModelId::Sig(GENERIC_LEVEL_SERVER), ModelRequest::LevelGet, true)
    }

    pub fn level_set(
        &mut self,
        name: &str,
        level: i16,
        transition: Option<Transition>,
        ack: bool,
    ) -> Result<Vec<Action>, MeshClientError> {
        let tid = self.next_tid();
        self.model_send(
            name,
            ModelId::Sig(GENERIC_LEVEL_SERVER),
            ModelRequest::LevelSet {
                level,
                tid,
                transition,
            },
            ack,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lighting
    // ═══════════════════════════════════════════════════════════════════════

    pub fn lightness_get(&mut self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        self.model_send(
            name,
            ModelId::Sig(LIGHT_LIGHTNESS_SERVER),
            ModelRequest::LightnessGet,
            true,
        )
    }

    pub fn lightness_set(
        &mut self,
        name: &str,
        lightness: u16,
        transition: Option<Transition>,
        ack: bool,
    ) -> Result<Vec<Action>, MeshClientError> {
        let tid = self.next_tid();
        self.model_send(
            name,
            ModelId::Sig(LIGHT_LIGHTNESS_SERVER),
            ModelRequest::LightnessSet {
                lightness,
                tid,
                transition,
            },
            ack,
        )
    }

    pub fn hsl_get(&mut self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        self.model_send(name, ModelId::Sig(LIGHT_HSL_SERVER), ModelRequest::HslGet, true)
    }

    pub fn hsl_set(
        &mut self,
        name: &str,
        lightness: u16,
        hue: u16,
        saturation: u16,
        transition: Option<Transition>,
        ack: bool,
    ) -> Result<Vec<Action>, MeshClientError> {
        let tid = self.next_tid();
        self.model_send(
            name,
            ModelId::Sig(LIGHT_HSL_SERVER),
            ModelRequest::HslSet {
                lightness,
                hue,
                saturation,
                tid,
                transition,
            },
            ack,
        )
    }

    pub fn ctl_get(&mut self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        self.model_send(name, ModelId::Sig(LIGHT_CTL_SERVER), ModelRequest::CtlGet, true)
    }

    pub fn ctl_set(
        &mut self,
        name: &str,
        lightness: u16,
        temperature: u16,
        delta_uv: i16,
        transition: Option<Transition>,
        ack: bool,
    ) -> Result<Vec<Action>, MeshClientError> {
        let tid = self.next_tid();
        self.model_send(
            name,
            ModelId::Sig(LIGHT_CTL_SERVER),
            ModelRequest::CtlSet {
                lightness,
                temperature,
                delta_uv,
                tid,
                transition,
            },
            ack,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sensor, health, vendor
    // ═══════════════════════════════════════════════════════════════════════

    /// Read sensor data for one property, or all properties.
    pub fn sensor_get(
        &mut self,
        name: &str,
        property: Option<u16>,
    ) -> Result<Vec<Action>, MeshClientError> {
        self.model_send(
            name,
            ModelId::Sig(SENSOR_SERVER),
            ModelRequest::SensorGet { property },
            true,
        )
    }

    /// Start (or with 0, stop) the attention timer of a node's health server.
    pub fn identify(&mut self, name: &str, seconds: u8) -> Result<Vec<Action>, MeshClientError> {
        self.model_send(
            name,
            ModelId::Sig(HEALTH_SERVER),
            ModelRequest::AttentionSet { seconds },
            true,
        )
    }

    /// Send raw data to a vendor model.
    pub fn vendor_send(
        &mut self,
        name: &str,
        company: u16,
        model: u16,
        opcode: u8,
        payload: Vec<u8>,
    ) -> Result<Vec<Action>, MeshClientError> {
        if opcode > 0x3F {
            return Err(MeshClientError::InvalidArgs(format!(
                "vendor opcode {:#04x}",
                opcode
            )));
        }
        self.model_send(
            name,
            ModelId::Vendor { company, model },
            ModelRequest::Vendor {
                company,
                opcode,
                payload,
            },
            false,
        )
    }

    fn next_tid(&mut self) -> u8 {
        self.tid = self.tid.wrapping_add(1);
        self.tid
    }

    /// Address `request` to the `model` instance named by `name`.
    ///
    /// The app key is the first one bound to the model, or the publication
    /// default. Messages to groups are never acknowledged.
    fn model_send(
        &mut self,
        name: &str,
        model: ModelId,
        request: ModelRequest,
        ack: bool,
    ) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let dst = model_destination(db, name, model)
            .ok_or_else(|| MeshClientError::NotFound(format!("{} with {}", name, model)))?;
        if db.node(dst).map(|n| n.blocked).unwrap_or(false) {
            return Err(MeshClientError::InvalidState("node is being removed"));
        }
        let app_key: AppKeyIndex = db
            .element(dst)
            .and_then(|e| e.model(model))
            .and_then(|m| m.bound_app_keys.first().copied())
            .unwrap_or(self.config.publication.app_key);
        if db.app_key(app_key).is_none() {
            return Err(MeshClientError::NotFound(format!("app key {}", app_key.0)));
        }
        if !self.is_local(dst) && !self.connected {
            return Err(MeshClientError::NotConnected);
        }

        let request_id = self.next_request();
        let reply = ack && dst.is_unicast();
        debug!(
            dst = %dst,
            request = request.type_name(),
            request_id = %request_id,
            reply,
            "Sending model message"
        );
        Ok(vec![Action::Send {
            request_id,
            dst,
            key: SecurityKey::App(app_key),
            reply,
            message: OutboundMessage::Model(request),
        }])
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{connect, open_client};
    use crate::MeshClientError;
    use meshctl_core::{Action, OutboundMessage};
    use meshctl_messages::ModelRequest;
    use meshctl_test_helpers::test_node;
    use meshctl_types::models::GENERIC_ONOFF_SERVER;
    use meshctl_types::{Address, ModelId};

    #[test]
    fn test_requires_connection_for_remote() {
        let mut client = open_client();
        let node = test_node(5, 0x0010, &[&[ModelId::Sig(GENERIC_ONOFF_SERVER)]]);
        client.db.as_mut().unwrap().add_node(node);
        assert_eq!(
            client.onoff_get("node-5"),
            Err(MeshClientError::NotConnected)
        );
    }

    #[test]
    fn test_single_member_group_is_acknowledged() {
        let mut client = open_client();
        connect(&mut client);
        let mut node = test_node(5, 0x0010, &[&[ModelId::Sig(GENERIC_ONOFF_SERVER)]]);
        let kitchen = client.db.as_mut().unwrap().create_group("kitchen", None).unwrap();
        node.elements[0].models[0].subscribe(kitchen);
        client.db.as_mut().unwrap().add_node(node);

        let actions = client.onoff_set("kitchen", true, None, true).unwrap();
        match &actions[..] {
            [Action::Send {
                dst,
                reply,
                message: OutboundMessage::Model(ModelRequest::OnOffSet { on: true, .. }),
                ..
            }] => {
                assert_eq!(*dst, Address(0x0010));
                assert!(*reply);
            }
            other => panic!("unexpected actions {:?}", other),
        }
    }

    #[test]
    fn test_tid_advances() {
        let mut client = open_client();
        connect(&mut client);
        let node = test_node(5, 0x0010, &[&[ModelId::Sig(GENERIC_ONOFF_SERVER)]]);
        client.db.as_mut().unwrap().add_node(node);
        let tid = |actions: Vec<Action>| match &actions[..] {
            [Action::Send {
                message: OutboundMessage::Model(ModelRequest::OnOffSet { tid, .. }),
                ..
            }] => *tid,
            other => panic!("unexpected actions {:?}", other),
        };
        let first = tid(client.onoff_set("node-5", true, None, false).unwrap());
        let second = tid(client.onoff_set("node-5", false, None, false).unwrap());
        assert_eq!(second, first.wrapping_add(1));
    }

    #[test]
    fn test_vendor_opcode_range() {
        let mut client = open_client();
        assert!(matches!(
            client.vendor_send("node-5", 0x05F1, 1, 0x40, vec![]),
            Err(MeshClientError::InvalidArgs(_))
        ));
    }
}
