//! Introspection document builder.

use crate::config::ProtocolNames;
use crate::message::TypeTag;
use std::fmt::Write;

const DOCTYPE: &str = "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">";

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescription {
    pub name: String,
    pub inputs: Vec<TypeTag>,
    pub outputs: Vec<TypeTag>,
}

/// Self-description of one service object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntrospectionDocument {
    pub interface: String,
    pub methods: Vec<MethodDescription>,
    pub signal_interfaces: Vec<String>,
}

impl IntrospectionDocument {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ..Self::default()
        }
    }

    pub fn add_method(&mut self, name: &str, inputs: &[TypeTag], outputs: &[TypeTag]) {
        self.methods.retain(|m| m.name != name);
        self.methods.push(MethodDescription {
            name: name.to_string(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
    }

    pub fn add_signal_interface(&mut self, interface: &str) {
        if !self.signal_interfaces.iter().any(|i| i == interface) {
            self.signal_interfaces.push(interface.to_string());
        }
    }

    pub fn render(&self) -> String {
        let mut xml = String::new();
        let _ = writeln!(xml, "{}", DOCTYPE);
        let _ = writeln!(xml, "<node>");

        let _ = writeln!(
            xml,
            "  <interface name=\"{}\">",
            ProtocolNames::INTROSPECTABLE_INTERFACE
        );
        let _ = writeln!(
            xml,
            "    <method name=\"{}\">",
            ProtocolNames::INTROSPECT_MEMBER
        );
        let _ = writeln!(xml, "      <arg name=\"data\" direction=\"out\" type=\"s\"/>");
        let _ = writeln!(xml, "    </method>");
        let _ = writeln!(xml, "  </interface>");

        let _ = writeln!(xml, "  <interface name=\"{}\">", escape(&self.interface));
        for method in &self.methods {
            let _ = writeln!(xml, "    <method name=\"{}\">", escape(&method.name));
            for tag in &method.inputs {
                let _ = writeln!(xml, "      <arg direction=\"in\" type=\"{}\"/>", tag.code());
            }
            for tag in &method.outputs {
                let _ = writeln!(xml, "      <arg direction=\"out\" type=\"{}\"/>", tag.code());
            }
            let _ = writeln!(xml, "    </method>");
        }
        let _ = writeln!(xml, "  </interface>");

        for interface in &self.signal_interfaces {
            // subscribed signal interface; members are not known up front
            let _ = writeln!(xml, "  <interface name=\"{}\"/>", escape(interface));
        }

        xml.push_str("</node>\n");
        xml
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
