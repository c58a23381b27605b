//! nc4dump - print the header of a netCDF-4 file in CDL form.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};

use nc4h5::logging::init_tracing;
use nc4h5::{
    parse_filter_spec_list, Att, Config, File, GroupId, OpenOptions, Storage, TypeId, UserKind, VarId,
};

#[derive(Parser, Debug)]
#[command(name = "nc4dump")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to describe
    file: Option<PathBuf>,

    /// Parse a `|`-separated filter spec list and print it as JSON
    #[arg(long)]
    filter_spec: Option<String>,

    /// JSON configuration file
    #[arg(short, long, env = "NC4H5_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "NC4H5_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    if let Some(spec) = &args.filter_spec {
        let specs = parse_filter_spec_list(spec).context("invalid filter spec")?;
        println!("{}", serde_json::to_string_pretty(&specs)?);
        if args.file.is_none() {
            return Ok(());
        }
    }

    let Some(path) = args.file else {
        anyhow::bail!("no input file given");
    };
    let config = Config::load(args.config.as_deref()).map_err(|e| {
        error!("configuration error: {e}");
        e
    })?;
    let opts = OpenOptions {
        config: Some(config),
        ..OpenOptions::read_only()
    };
    let file = File::open(&path, opts).with_context(|| format!("cannot open {}", path.display()))?;
    debug!(path = %path.display(), "opened");

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let mut out = String::new();
    writeln!(out, "netcdf {name} {{")?;
    dump_group(&file, file.root(), 0, &mut out)?;
    writeln!(out, "}}")?;
    print!("{out}");
    Ok(())
}

fn type_name(file: &File, tid: TypeId) -> String {
    if tid.is_atomic() {
        return tid.to_string();
    }
    file.inq_user_type(tid)
        .map(|t| t.name.clone())
        .unwrap_or_else(|_| tid.to_string())
}

fn att_value(file: &File, att: &Att) -> String {
    if att.type_id == TypeId::CHAR {
        return format!("{:?}", att.as_text().unwrap_or_default());
    }
    if let Some(strings) = att.as_strings() {
        return strings.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>().join(", ");
    }
    fn join<T: std::fmt::Display>(values: Vec<T>) -> String {
        values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
    }
    let listed = match att.type_id {
        TypeId::BYTE => att.values::<i8>().map(join),
        TypeId::UBYTE => att.values::<u8>().map(join),
        TypeId::SHORT => att.values::<i16>().map(join),
        TypeId::USHORT => att.values::<u16>().map(join),
        TypeId::INT => att.values::<i32>().map(join),
        TypeId::UINT => att.values::<u32>().map(join),
        TypeId::INT64 => att.values::<i64>().map(join),
        TypeId::UINT64 => att.values::<u64>().map(join),
        TypeId::FLOAT => att.values::<f32>().map(join),
        TypeId::DOUBLE => att.values::<f64>().map(join),
        other => Ok(format!("<{} values of {}>", att.len, type_name(file, other))),
    };
    listed.unwrap_or_else(|e| format!("<{e}>"))
}

fn dump_atts(file: &File, group: GroupId, owner: VarId, prefix: &str, pad: &str, out: &mut String) -> Result<()> {
    for i in 0..file.inq_natts(group, owner)? {
        let name = file.inq_attname(group, owner, i)?;
        let att = file.get_att(group, owner, name)?;
        writeln!(out, "{pad}{prefix}:{name} = {} ;", att_value(file, att))?;
    }
    Ok(())
}

fn dump_group(file: &File, gid: GroupId, depth: usize, out: &mut String) -> Result<()> {
    let pad = "\t".repeat(depth);
    let g = file.group(gid)?;

    if !g.types.is_empty() {
        writeln!(out, "{pad}types:")?;
        for t in g.types.iter() {
            let body = match &t.kind {
                UserKind::Compound { fields } => {
                    let fields: Vec<String> = fields
                        .iter()
                        .map(|f| {
                            let dims = if f.dims.is_empty() {
                                String::new()
                            } else {
                                format!("({})", f.dims.iter().map(u32::to_string).collect::<Vec<_>>().join(", "))
                            };
                            format!("{} {}{dims}", type_name(file, f.type_id), f.name)
                        })
                        .collect();
                    format!("compound {} {{ {} }}", t.name, fields.join("; "))
                }
                UserKind::Vlen { base } => format!("{}(*) {}", type_name(file, *base), t.name),
                UserKind::Enum { base, members } => {
                    let members: Vec<String> = members.iter().map(|m| format!("{} = {}", m.name, m.value)).collect();
                    format!("{} enum {} {{ {} }}", type_name(file, *base), t.name, members.join(", "))
                }
                UserKind::Opaque => format!("opaque({}) {}", t.size, t.name),
            };
            writeln!(out, "{pad}\t{body} ;")?;
        }
    }

    if !g.dims.is_empty() {
        writeln!(out, "{pad}dimensions:")?;
        for d in g.dims.iter() {
            let len = file.dim_len(d.id)?;
            if d.unlimited {
                writeln!(out, "{pad}\t{} = UNLIMITED ; // ({len} currently)", d.name)?;
            } else {
                writeln!(out, "{pad}\t{} = {len} ;", d.name)?;
            }
        }
    }

    if !g.vars.is_empty() {
        writeln!(out, "{pad}variables:")?;
        for v in g.vars.iter() {
            let dims: Vec<String> = v
                .dimids
                .iter()
                .map(|&d| file.dim(d).map(|d| d.name.clone()).unwrap_or_else(|_| format!("dim#{}", d.0)))
                .collect();
            let shape = if dims.is_empty() {
                String::new()
            } else {
                format!("({})", dims.join(", "))
            };
            writeln!(out, "{pad}\t{} {}{shape} ;", type_name(file, v.type_id), v.name)?;
            let vpad = format!("{pad}\t\t");
            match &v.storage {
                Storage::Chunked(sizes) => {
                    let sizes: Vec<String> = sizes.iter().map(u64::to_string).collect();
                    writeln!(out, "{vpad}{}:_ChunkSizes = {} ;", v.name, sizes.join(", "))?;
                }
                Storage::Contiguous => writeln!(out, "{vpad}{}:_Storage = \"contiguous\" ;", v.name)?,
                Storage::Compact => writeln!(out, "{vpad}{}:_Storage = \"compact\" ;", v.name)?,
            }
            if !v.filters.is_empty() {
                let filters: Vec<String> = v
                    .filters
                    .iter()
                    .map(|f| {
                        let mut s = f.id.to_string();
                        for p in &f.params {
                            s.push_str(&format!(",{p}"));
                        }
                        s
                    })
                    .collect();
                writeln!(out, "{vpad}{}:_Filter = \"{}\" ;", v.name, filters.join("|"))?;
            }
            let cache = file.get_var_chunk_cache(gid, v.id)?;
            writeln!(
                out,
                "{vpad}// chunk cache: {} bytes, {} slots, preemption {}",
                cache.size, cache.nelems, cache.preemption
            )?;
            dump_atts(file, gid, v.id, &v.name, &vpad, out)?;
        }
    }

    if !g.atts.is_empty() {
        writeln!(out)?;
        writeln!(out, "{pad}// {} attributes:", if gid == file.root() { "global" } else { "group" })?;
        dump_atts(file, gid, VarId::GLOBAL, "", &format!("{pad}\t\t"), out)?;
    }

    for &child in &g.children {
        writeln!(out)?;
        writeln!(out, "{pad}group: {} {{", file.inq_grpname(child)?)?;
        dump_group(file, child, depth + 1, out)?;
        writeln!(out, "{pad}}} // group {}", file.inq_grpname(child)?)?;
    }
    Ok(())
}
