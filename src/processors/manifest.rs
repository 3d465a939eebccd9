//! Action manifests: everything the platform needs to install a flow step.
//!
//! A manifest names the action's route base, its service definition
//! (invocation and callback attributes), its picklists and the basic-auth
//! realm. The orchestrator also reads the ledger table names and output column
//! from it.

use serde_json::{json, Value};

/// One attribute in an invocation or callback payload definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub api_name: &'static str,
    /// Platform data type (`string`, `text`, `integer`, `float`).
    pub data_type: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// The attribute's values come from [`ActionManifest::picklist`].
    pub has_picklist: bool,
}

impl AttributeDef {
    pub const fn new(
        api_name: &'static str,
        data_type: &'static str,
        name: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            api_name,
            data_type,
            name,
            description,
            has_picklist: false,
        }
    }

    pub const fn with_picklist(mut self) -> Self {
        self.has_picklist = true;
        self
    }

    fn flow_json(&self) -> Value {
        let mut attribute = json!({
            "apiName": self.api_name,
            "dataType": self.data_type,
            "description": self.description,
            "i18n": { "en_US": { "name": self.name } },
        });
        if self.has_picklist {
            attribute["hasPicklist"] = Value::Bool(true);
            attribute["enforcePicklistSelect"] = Value::Bool(true);
        }
        attribute
    }

    fn callback_json(&self) -> Value {
        json!({
            "apiName": self.api_name,
            "dataType": self.data_type,
            "i18n": { "en_US": { "name": self.name, "description": self.description } },
        })
    }
}

/// Fixed set of choices for one flow attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picklist {
    pub field: &'static str,
    pub choices: Vec<&'static str>,
}

impl Picklist {
    /// `{"choices": [{"displayValue": {"en_US": c}, "submittedValue": c}]}`
    pub fn to_json(&self) -> Value {
        let choices: Vec<Value> = self
            .choices
            .iter()
            .map(|choice| {
                json!({
                    "displayValue": { "en_US": choice },
                    "submittedValue": choice,
                })
            })
            .collect();
        json!({ "choices": choices })
    }
}

/// Static description of one flow-step action.
#[derive(Debug, Clone)]
pub struct ActionManifest {
    /// Route prefix and ledger table prefix, e.g. `calcFormula`.
    pub base: &'static str,
    /// Service `apiName`, e.g. `calc-formula`.
    pub api_name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub trigger_name: &'static str,
    pub filter_name: &'static str,
    pub primary_attribute: &'static str,
    /// `WWW-Authenticate` realm for the gated routes.
    pub realm: &'static str,
    pub flow_attributes: Vec<AttributeDef>,
    pub callback_attributes: Vec<AttributeDef>,
    pub callback_user_driven_mapping: bool,
    pub picklists: Vec<Picklist>,
    /// Flow attribute naming the lead field the result is written to.
    pub response_attribute: Option<&'static str>,
    /// Ledger column holding the item's output.
    pub output_column: &'static str,
}

impl ActionManifest {
    /// Ledger table receiving one row per item.
    pub fn items_table(&self) -> String {
        format!("{}Leads", self.base)
    }

    /// Ledger table receiving one row per batch.
    pub fn batches_table(&self) -> String {
        format!("{}Batches", self.base)
    }

    pub fn picklist(&self, field: &str) -> Option<&Picklist> {
        self.picklists.iter().find(|p| p.field == field)
    }

    /// The platform's service definition document.
    pub fn service_definition(&self) -> Value {
        json!({
            "apiName": self.api_name,
            "i18n": {
                "en_US": {
                    "name": self.display_name,
                    "description": self.description,
                    "triggerName": self.trigger_name,
                    "filterName": self.filter_name,
                }
            },
            "primaryAttribute": self.primary_attribute,
            "invocationPayloadDef": {
                "flowAttributes": self.flow_attributes.iter().map(AttributeDef::flow_json).collect::<Vec<_>>(),
                "userDrivenMapping": false,
                "fields": [],
            },
            "callbackPayloadDef": {
                "attributes": self.callback_attributes.iter().map(AttributeDef::callback_json).collect::<Vec<_>>(),
                "fields": [],
                "userDrivenMapping": self.callback_user_driven_mapping,
            },
        })
    }

    /// OpenAPI document served by the install route.
    pub fn openapi(&self, server_url: Option<&str>) -> Value {
        let base = format!("/{}", self.base);
        let mut doc = json!({
            "openapi": "3.0.0",
            "info": {
                "title": self.display_name,
                "description": self.description,
                "version": crate::VERSION,
            },
            "components": {
                "securitySchemes": {
                    "basicAuth": { "type": "http", "scheme": "basic" }
                }
            },
            "paths": {
                format!("{}/getServiceDefinition", base): {
                    "get": {
                        "operationId": "getServiceDefinition",
                        "responses": { "200": { "description": "Service definition" } }
                    }
                },
                format!("{}/submitAsyncAction", base): {
                    "post": {
                        "operationId": "submitAsyncAction",
                        "security": [ { "basicAuth": [] } ],
                        "responses": {
                            "202": { "description": "Batch processed and callback delivered" },
                            "500": { "description": "Callback delivery or batch setup failed" }
                        }
                    }
                },
                format!("{}/status", base): {
                    "get": {
                        "operationId": "status",
                        "security": [ { "basicAuth": [] } ],
                        "responses": { "200": { "description": "Service status" } }
                    }
                },
                format!("{}/serviceIcon", base): {
                    "get": {
                        "operationId": "serviceIcon",
                        "responses": { "200": { "description": "Service icon" } }
                    }
                },
                format!("{}/brandIcon", base): {
                    "get": {
                        "operationId": "brandIcon",
                        "responses": { "200": { "description": "Brand icon" } }
                    }
                }
            }
        });

        if !self.picklists.is_empty() {
            doc["paths"][format!("{}/getPicklist", base)] = json!({
                "post": {
                    "operationId": "getPicklist",
                    "responses": { "200": { "description": "Picklist choices" } }
                }
            });
        }
        if let Some(url) = server_url {
            doc["servers"] = json!([{ "url": url }]);
        }
        doc
    }
}
