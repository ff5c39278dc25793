use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::service::LarderService;
use larder_core::units;

pub(crate) fn cmd_unit_list(svc: &LarderService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct UnitRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Base unit")]
        base_unit: String,
        #[tabled(rename = "Factor")]
        factor: String,
    }

    let all = svc.db().list_units()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    let rows: Vec<UnitRow> = all
        .iter()
        .map(|u| match units::lookup(&u.name) {
            Some(conv) => UnitRow {
                id: u.id,
                name: u.name.clone(),
                base_unit: conv.base_unit.to_string(),
                factor: format!("{}", conv.factor),
            },
            None => UnitRow {
                id: u.id,
                name: u.name.clone(),
                base_unit: "(itself)".to_string(),
                factor: "-".to_string(),
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_unit_add(svc: &LarderService, name: &str, json: bool) -> Result<()> {
    let unit = svc.create_unit(name)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&unit)?);
    } else {
        println!("Created unit: {} (id: {})", unit.name, unit.id);
        eprintln!("Note: custom units are never converted; they only add up with themselves.");
    }
    Ok(())
}
