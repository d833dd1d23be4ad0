//! Everything that knows what the remote generator's page looks like.
//!
//! Each function returns a self-contained script that answers with a short
//! status word; the `parse_*` helpers turn those words into typed outcomes.
//! Scripts carry a `/*stager:<tag>*/` prefix so a transcript (or a fake
//! driver) can tell them apart.

use crate::poll::PollOutcome;

pub mod tag {
    pub const DOCUMENT_READY: &str = "document_ready";
    pub const UPLOAD_RECEIVED: &str = "upload_received";
    pub const SELECT_QUALITY: &str = "select_quality";
    pub const FEATURE_STATE: &str = "feature_state";
    pub const TOGGLE_OFF: &str = "toggle_off";
    pub const READ_COST: &str = "read_cost";
    pub const CLICK_GENERATE: &str = "click_generate";
    pub const GENERATION_STATUS: &str = "generation_status";
    pub const OPEN_EXPORT: &str = "open_export";
    pub const SET_EXPORT_FILENAME: &str = "set_export_filename";
    pub const CONFIRM_EXPORT: &str = "confirm_export";
    pub const NAVIGATE: &str = "navigate";
    pub const OPEN_LATEST_MENU: &str = "open_latest_menu";
    pub const CLICK_MENU_ITEM: &str = "click_menu_item";
    pub const CONFIRM_DIALOG: &str = "confirm_dialog";
}

/// Labels and markers the scripts match on. These drift whenever the remote UI
/// is redesigned, so they live in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProfile {
    pub quality_tier: String,
    pub costly_feature: String,
    pub generate_label: String,
    pub export_label: String,
    pub export_confirm_label: String,
    pub failure_markers: Vec<String>,
    pub delete_label: String,
    pub delete_confirm_label: String,
}

impl Default for RemoteProfile {
    fn default() -> Self {
        Self {
            quality_tier: "Standard".into(),
            costly_feature: "HD Texture".into(),
            generate_label: "Generate".into(),
            export_label: "Export".into(),
            export_confirm_label: "Download".into(),
            failure_markers: vec!["Generation failed".into(), "Something went wrong".into()],
            delete_label: "Delete".into(),
            delete_confirm_label: "Delete".into(),
        }
    }
}

// Shared lookup helpers injected into every interactive script.
const PRELUDE: &str = r#"
function __text(el){return (el.innerText||el.textContent||'').replace(/\s+/g,' ').trim();}
function __visible(el){var r=el.getBoundingClientRect();return r.width>0&&r.height>0;}
function __byText(sel,label,exact){
  var els=Array.prototype.slice.call(document.querySelectorAll(sel));
  for(var i=0;i<els.length;i++){
    var t=__text(els[i]);
    if(!__visible(els[i]))continue;
    if(exact?t===label:t.indexOf(label)!==-1)return els[i];
  }
  return null;
}
function __switchFor(label){
  var sw=Array.prototype.slice.call(document.querySelectorAll('[role=switch],button[aria-checked],input[type=checkbox]'));
  for(var i=0;i<sw.length;i++){
    var own=sw[i].getAttribute('aria-label')||'';
    var scope=sw[i].closest('label,li,div');
    if(own.indexOf(label)!==-1||(scope&&__text(scope).indexOf(label)!==-1))return sw[i];
  }
  return null;
}
function __isOn(el){
  if(el.type==='checkbox')return !!el.checked;
  return el.getAttribute('aria-checked')==='true';
}
"#;

fn tagged(tag: &str, body: &str) -> String {
    format!("/*stager:{tag}*/(function(){{{PRELUDE}{body}}})()")
}

/// JS string literal for `value`.
fn js(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Tag of a script produced by this module.
#[cfg(test)]
pub fn script_tag(script: &str) -> Option<&str> {
    let rest = script.strip_prefix("/*stager:")?;
    rest.split_once("*/").map(|(tag, _)| tag)
}

pub fn document_ready() -> String {
    tagged(tag::DOCUMENT_READY, "return document.readyState;")
}

pub fn upload_received() -> String {
    tagged(
        tag::UPLOAD_RECEIVED,
        r#"
var inputs=document.querySelectorAll('input[type=file]');
for(var i=0;i<inputs.length;i++){if(inputs[i].files&&inputs[i].files.length>0)return 'received';}
if(document.querySelector('img[src^="blob:"],img[src^="data:image"]'))return 'received';
return 'waiting';"#,
    )
}

pub fn navigate(url: &str) -> String {
    tagged(
        tag::NAVIGATE,
        &format!("window.location.href={};return 'navigating';", js(url)),
    )
}

impl RemoteProfile {
    pub fn select_quality(&self) -> String {
        tagged(
            tag::SELECT_QUALITY,
            &format!(
                r#"
var el=__byText('[role=radio],[role=tab],[role=option],button',{tier},true);
if(!el)return 'not_found';
if(el.getAttribute('aria-checked')==='true'||el.getAttribute('aria-selected')==='true'||el.getAttribute('data-state')==='active')return 'already';
el.click();return 'selected';"#,
                tier = js(&self.quality_tier)
            ),
        )
    }

    pub fn feature_state(&self) -> String {
        tagged(
            tag::FEATURE_STATE,
            &format!(
                "var sw=__switchFor({label});if(!sw)return 'not_found';return __isOn(sw)?'on':'off';",
                label = js(&self.costly_feature)
            ),
        )
    }

    /// Read-check-then-act: only clicks when the switch currently reads as on.
    pub fn toggle_off(&self) -> String {
        tagged(
            tag::TOGGLE_OFF,
            &format!(
                "var sw=__switchFor({label});if(!sw)return 'not_found';if(!__isOn(sw))return 'already_off';sw.click();return 'clicked';",
                label = js(&self.costly_feature)
            ),
        )
    }

    pub fn read_cost(&self) -> String {
        tagged(
            tag::READ_COST,
            &format!(
                r#"
var btn=__byText('button',{label},false);
if(!btn)return 'not_found';
var m=__text(btn).match(/(\d+)/);
return m?m[1]:'not_found';"#,
                label = js(&self.generate_label)
            ),
        )
    }

    pub fn click_generate(&self) -> String {
        tagged(
            tag::CLICK_GENERATE,
            &format!(
                "var btn=__byText('button',{label},false);if(!btn)return 'not_found';if(btn.disabled)return 'disabled';btn.click();return 'clicked';",
                label = js(&self.generate_label)
            ),
        )
    }

    pub fn generation_status(&self) -> String {
        let markers = serde_json::to_string(&self.failure_markers).unwrap_or_else(|_| "[]".into());
        tagged(
            tag::GENERATION_STATUS,
            &format!(
                r#"
var body=__text(document.body);
var markers={markers};
for(var i=0;i<markers.length;i++){{if(body.indexOf(markers[i])!==-1)return 'failed';}}
var btn=__byText('button',{export},false);
if(btn&&!btn.disabled)return 'done';
return 'pending';"#,
                export = js(&self.export_label)
            ),
        )
    }

    pub fn open_export(&self) -> String {
        tagged(
            tag::OPEN_EXPORT,
            &format!(
                "var btn=__byText('button',{label},false);if(!btn)return 'not_found';btn.click();return 'opened';",
                label = js(&self.export_label)
            ),
        )
    }

    /// Sets the filename field through the native value setter so framework
    /// bindings observe the change.
    pub fn set_export_filename(&self, stem: &str) -> String {
        tagged(
            tag::SET_EXPORT_FILENAME,
            &format!(
                r#"
var dlg=document.querySelector('[role=dialog]')||document;
var input=dlg.querySelector('input[type=text],input:not([type])');
if(!input)return 'not_found';
var setter=Object.getOwnPropertyDescriptor(HTMLInputElement.prototype,'value').set;
setter.call(input,{stem});
input.dispatchEvent(new Event('input',{{bubbles:true}}));
input.dispatchEvent(new Event('change',{{bubbles:true}}));
return 'set';"#,
                stem = js(stem)
            ),
        )
    }

    pub fn confirm_export(&self) -> String {
        dialog_button(tag::CONFIRM_EXPORT, &self.export_confirm_label)
    }

    pub fn open_latest_menu(&self) -> String {
        tagged(
            tag::OPEN_LATEST_MENU,
            r#"
var btns=Array.prototype.slice.call(document.querySelectorAll('[aria-haspopup=menu],[aria-label*="More"],[aria-label*="more"]'));
for(var i=0;i<btns.length;i++){if(__visible(btns[i])){btns[i].click();return 'opened';}}
return 'not_found';"#,
        )
    }

    pub fn click_delete_item(&self) -> String {
        tagged(
            tag::CLICK_MENU_ITEM,
            &format!(
                "var it=__byText('[role=menuitem],[role=menu] button',{label},false);if(!it)return 'not_found';it.click();return 'clicked';",
                label = js(&self.delete_label)
            ),
        )
    }

    pub fn confirm_delete(&self) -> String {
        dialog_button(tag::CONFIRM_DIALOG, &self.delete_confirm_label)
    }
}

fn dialog_button(tag: &str, label: &str) -> String {
    tagged(
        tag,
        &format!(
            r#"
var dlg=document.querySelector('[role=dialog],[role=alertdialog]')||document;
var btns=Array.prototype.slice.call(dlg.querySelectorAll('button'));
for(var i=0;i<btns.length;i++){{if(__text(btns[i])==={label}&&!btns[i].disabled){{btns[i].click();return 'clicked';}}}}
return 'not_found';"#,
            label = js(label)
        ),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    AlreadySatisfied,
    NotFound,
    Disabled,
    Unexpected(String),
}

pub fn parse_action(raw: &str) -> ActionOutcome {
    match raw.trim() {
        "clicked" | "selected" | "opened" | "set" | "navigating" => ActionOutcome::Done,
        "already" | "already_off" => ActionOutcome::AlreadySatisfied,
        "not_found" => ActionOutcome::NotFound,
        "disabled" => ActionOutcome::Disabled,
        other => ActionOutcome::Unexpected(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureState {
    On,
    Off,
    NotFound,
    Unknown(String),
}

pub fn parse_feature_state(raw: &str) -> FeatureState {
    match raw.trim() {
        "on" => FeatureState::On,
        "off" => FeatureState::Off,
        "not_found" => FeatureState::NotFound,
        other => FeatureState::Unknown(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CostReading {
    Found(String),
    NotFound,
}

pub fn parse_cost(raw: &str) -> CostReading {
    let value = raw.trim();
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        CostReading::Found(value.to_string())
    } else {
        CostReading::NotFound
    }
}

pub fn parse_generation_status(raw: &str) -> PollOutcome {
    match raw.trim() {
        "done" => PollOutcome::Done,
        "failed" => PollOutcome::Failed,
        _ => PollOutcome::Pending,
    }
}
