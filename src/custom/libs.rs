//! Host modules available to source scripts.
//!
//! `http.get(url)` returns the response body as a string.
//! `html.select(document, selector)` returns an array of
//! `{ text = ..., html = ..., attrs = { ... } }` tables in document order.

use crate::generic::extract::{compile, text};
use crate::utils::HttpClient;
use mlua::{Lua, Table};
use scraper::Html;
use tokio::runtime::Handle;

pub fn register(lua: &Lua, http: HttpClient) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("http", http_module(lua, http)?)?;
    globals.set("html", html_module(lua)?)?;
    Ok(())
}

fn http_module(lua: &Lua, client: HttpClient) -> mlua::Result<Table> {
    let module = lua.create_table()?;

    // Scripts run on blocking threads, so waiting on the runtime here is allowed.
    let get = lua.create_function(move |_, url: String| {
        let handle = Handle::try_current().map_err(mlua::Error::external)?;
        handle.block_on(client.get(&url)).map_err(mlua::Error::external)
    })?;
    module.set("get", get)?;

    Ok(module)
}

fn html_module(lua: &Lua) -> mlua::Result<Table> {
    let module = lua.create_table()?;

    let select = lua.create_function(|lua, (document, selector): (String, String)| {
        let selector = compile(&selector).map_err(mlua::Error::external)?;
        let document = Html::parse_document(&document);

        let matches = lua.create_table()?;
        for (position, element) in document.select(&selector).enumerate() {
            let node = lua.create_table()?;
            node.set("text", text(&element))?;
            node.set("html", element.html())?;

            let attrs = lua.create_table()?;
            for (name, value) in element.value().attrs() {
                attrs.set(name, value)?;
            }
            node.set("attrs", attrs)?;

            matches.set(position + 1, node)?;
        }
        Ok(matches)
    })?;
    module.set("select", select)?;

    Ok(module)
}
