use crate::library::{PartCatalog, ReferenceEntry};

pub fn build_system_prompt() -> String {
    "You are a power electronics design expert. You describe circuits as netlists \
     in the S-expression format you are given, and you answer with exactly one \
     ```netlist code block."
        .to_string()
}

/// First user message for a task.
pub fn build_task_prompt(entry: &ReferenceEntry, catalog: &PartCatalog) -> String {
    let task = &entry.task;
    let voltage = match task.voltage {
        Some(v) => format!("Input voltage: {} V. Output voltage: {} V.", v.input, v.output),
        None => "No voltage specification.".to_string(),
    };

    format!(
        r#"Design the following circuit.

Task: {}
Input nodes: {}
Output nodes: {}
{}

Write the circuit as a netlist in this exact syntax:

```netlist
(netlist
  (ports (input VIN) (output VOUT))
  (components
    (comp (ref R1) (part R) (value 10k))
    (comp (ref U1) (part TLV1117-33)))
  (nets
    (net (name VIN) (node (ref R1) (pin 1)) (node (ref U1) (pin 3)))
    (net (name VOUT) (node (ref R1) (pin 2)) (node (ref U1) (pin 2))))
  (no_connect (node (ref U1) (pin 4))))
```

Rules:
- Use the input and output node names above as net names, exactly as written.
- Every pin of every component must appear in exactly one net or in (no_connect).
- Use only the parts listed below. Generic passives are R, C, L and D.

Available parts:
{}

Output the complete netlist in one ```netlist code block."#,
        task.description,
        task.inputs.join(", "),
        task.outputs.join(", "),
        voltage,
        summarize_parts(entry, catalog)
    )
}

/// Pin tables for every part allowed in a class the reference uses.
fn summarize_parts(entry: &ReferenceEntry, catalog: &PartCatalog) -> String {
    let subs = &entry.reference.substitutions;
    let mut classes: Vec<&str> = Vec::new();
    for comp in entry.reference.graph.components() {
        if let Some(class) = subs.class_of(&comp.part) {
            if !classes.contains(&class) {
                classes.push(class);
            }
        }
    }

    let mut lines = Vec::new();
    for class in classes {
        for name in subs.parts_in(class) {
            let Some(part) = catalog.get(name) else {
                continue;
            };
            let pins: Vec<String> = part
                .pins
                .iter()
                .map(|p| match &p.name {
                    Some(n) => format!("{}={} ({})", p.number, n, p.role),
                    None => format!("{} ({})", p.number, p.role),
                })
                .collect();
            let rating = part
                .max_voltage
                .map(|v| format!(", rated {} V", v))
                .unwrap_or_default();
            let description = part
                .description
                .as_ref()
                .map(|d| format!(" {}", d))
                .unwrap_or_default();
            lines.push(format!(
                "- {} [{}{}]{} pins: {}",
                part.name,
                class,
                rating,
                description,
                pins.join(", ")
            ));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ReferenceLibrary;

    #[test]
    fn test_task_prompt_names_ports_and_parts() {
        let library = ReferenceLibrary::builtin().unwrap();
        let entry = library.get("LDO_AUX_LOGIC").unwrap();
        let prompt = build_task_prompt(entry, library.catalog());

        assert!(prompt.contains("Input nodes: VIN"));
        assert!(prompt.contains("Output nodes: VOUT"));
        assert!(prompt.contains("Input voltage: 5 V"));
        assert!(prompt.contains("- AMS1117-3.3 [ldo_3v3"));
        assert!(prompt.contains("4=TAB (output)"));
        assert!(!prompt.contains("IMW65R015M2H"));
    }
}
