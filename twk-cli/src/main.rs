use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use twk_core::header::Contig;
use twk_core::reader::Reader;
use twk_core::record::LdRecord;
use twk_core::tgzf::{self, FixedRecord};
use twk_core::writer::Writer;
use twk_core::SortState;
use twk_genotype::controller::CONTROLLER_PHASED;
use twk_genotype::meta::{VariantMeta, VARIANT_META_SIZE};
use twk_genotype::run::{ALLELE_ALT, ALLELE_MISSING, ALLELE_REF};
use twk_genotype::view::GenotypeView;
use twk_import::bcf;
use twk_import::ingest::{self, Pipeline};
use twk_import::vcf;
use twk_sort::ld;
use twk_sort::{merge, sort};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "twk",
    about = "TWK variant-data storage engine and pairwise LD compute pipeline",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a VCF or BCF stream into TWK format
    Import {
        /// Input VCF (text) or BCF (BGZF binary) file
        #[arg(short, long)]
        input: PathBuf,
        /// Output prefix; a ".twk" suffix is appended if not already present
        #[arg(short, long)]
        output: PathBuf,
        /// Fraction of missing calls above which a variant is dropped
        #[arg(short = 'M', long, default_value_t = ingest::DEFAULT_MISSINGNESS_CUTOFF)]
        missingness: f32,
        /// Uncompressed bytes at which a data block is flushed
        #[arg(short = 'b', long, default_value_t = ingest::DEFAULT_BLOCK_FLUSH_LIMIT)]
        block_flush_limit: usize,
        /// Resume ingest into an existing unsorted/partially-sorted TWK file
        /// instead of creating a new one
        #[arg(long)]
        extend: bool,
    },
    /// Partition and in-memory sort a TWK records file (external sort, phase 1)
    Sort {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Number of worker threads (one partition per thread)
        #[arg(short = 't', long, default_value_t = 4)]
        threads: usize,
        /// Per-worker in-memory record buffer budget, in bytes
        #[arg(short = 'L', long, default_value_t = 128 * 1024 * 1024)]
        memory_limit: usize,
    },
    /// K-way merge a partially-sorted TWK records file (external sort, phase 2)
    Merge {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Compute pairwise LD statistics within a sliding window of each block
    Calc {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Maximum base-pair distance between two variants considered a pair
        #[arg(short, long, default_value_t = 1_000_000)]
        window: u32,
    },
    /// Re-emit a TWK file's variants as VCF text
    View {
        #[arg(short, long)]
        input: PathBuf,
        /// Destination file; stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print header and block-index summary
    Stat {
        #[arg(short, long)]
        input: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Append a ".twk" suffix to an output prefix unless it already carries one,
/// the way `ancf_cli` takes a bare destination path but this format's
/// convention (spec.md §6's CLI interface) is prefix-based.
fn twk_path(prefix: &Path) -> PathBuf {
    if prefix.extension().map(|e| e == "twk").unwrap_or(false) {
        prefix.to_path_buf()
    } else {
        let mut s = prefix.as_os_str().to_owned();
        s.push(".twk");
        PathBuf::from(s)
    }
}

fn human_count(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.chars().rev().collect()
}

/// Extract `(name, length)` pairs from `##contig=<ID=name,length=N>` meta
/// lines, in file order — BCF's numeric contig ids are a dictionary over
/// exactly this ordering, so this also doubles as the contig table for BCF
/// ingest. VCF doesn't strictly require `##contig` lines; when none are
/// present the caller falls back to discovering contigs from data order.
fn contigs_from_literals(literals: &str) -> Vec<Contig> {
    let mut contigs = Vec::new();
    let mut id = 0u32;
    for line in literals.lines() {
        let Some(rest) = line.strip_prefix("##contig=<") else { continue };
        let Some(body) = rest.strip_suffix('>') else { continue };
        let mut name = None;
        let mut length = 0u32;
        for field in body.split(',') {
            if let Some(v) = field.strip_prefix("ID=") {
                name = Some(v.to_string());
            } else if let Some(v) = field.strip_prefix("length=") {
                length = v.parse().unwrap_or(0);
            }
        }
        if let Some(name) = name {
            contigs.push(Contig { id, name, length, n_blocks: 0 });
            id += 1;
        }
    }
    contigs
}

/// Fall back for VCF input with no `##contig` lines: assign ids in order of
/// first appearance in the data.
fn contigs_from_data_order(lines: &[&str]) -> Vec<Contig> {
    let mut contigs = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for line in lines {
        let Some(name) = line.split('\t').next() else { continue };
        if seen.insert(name.to_string()) {
            contigs.push(Contig {
                id: contigs.len() as u32,
                name: name.to_string(),
                length: 0,
                n_blocks: 0,
            });
        }
    }
    contigs
}

fn sniff_is_bcf(path: &Path) -> anyhow::Result<bool> {
    let mut file = File::open(path).with_context(|| format!("opening {path:?}"))?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    Ok(n == 2 && magic == [0x1f, 0x8b])
}

// ── import ─────────────────────────────────────────────────────────────────

fn run_import(
    input: PathBuf,
    output: PathBuf,
    missingness: f32,
    block_flush_limit: usize,
    extend: bool,
) -> anyhow::Result<()> {
    let output = twk_path(&output);
    let t0 = Instant::now();
    let config = ingest::ImportConfig { missingness_cutoff: missingness, block_flush_limit };

    if sniff_is_bcf(&input)? {
        import_bcf(&input, &output, config, extend)?;
    } else {
        import_vcf(&input, &output, config, extend)?;
    }

    log::info!("import completed in {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

fn import_vcf(input: &Path, output: &Path, config: ingest::ImportConfig, extend: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(input).with_context(|| format!("reading {input:?}"))?;
    let mut lines = text.lines();
    let vcf_header = vcf::parse_header(&mut lines).context("parsing VCF header")?;
    let data_lines: Vec<&str> = lines.filter(|l| !l.is_empty()).collect();

    let mut pipeline = if extend {
        Pipeline::extend(output).with_context(|| format!("opening {output:?} to extend"))?
    } else {
        let mut contigs = contigs_from_literals(&vcf_header.literals);
        if contigs.is_empty() {
            contigs = contigs_from_data_order(&data_lines);
        }
        let header = vcf::build_header(&vcf_header, contigs)?;
        Pipeline::create(output, header)?
    };
    pipeline.apply_config(config);

    for line in &data_lines {
        let record = vcf::parse_record(line)?;
        let is_snp = vcf::is_biallelic_snp(&record.reference, &record.alt);
        let (ref_allele, alt_allele) = (
            record.reference.as_bytes().first().copied().unwrap_or(b'N'),
            record.alt.as_bytes().first().copied().unwrap_or(b'N'),
        );
        pipeline.ingest_variant(
            &record.contig,
            record.position,
            ref_allele,
            alt_allele,
            is_snp,
            &record.genotypes,
        )?;
    }

    let stats = pipeline.stats();
    let index = pipeline.finish()?;
    report_ingest(&index, stats);
    Ok(())
}

fn import_bcf(input: &Path, output: &Path, config: ingest::ImportConfig, extend: bool) -> anyhow::Result<()> {
    let mut file = File::open(input).with_context(|| format!("opening {input:?}"))?;
    let file_len = file.seek(SeekFrom::End(0))?;
    let decompressed = tgzf::inflate_range(&mut file, 0, file_len)?;

    let (text, mut pos) = bcf::parse_text_header(&decompressed)?;
    let mut header_lines = text.lines();
    let vcf_header = vcf::parse_header(&mut header_lines).context("parsing BCF text header")?;
    let n_samples = vcf_header.samples.len();

    let mut pipeline = if extend {
        Pipeline::extend(output).with_context(|| format!("opening {output:?} to extend"))?
    } else {
        let contigs = contigs_from_literals(&vcf_header.literals);
        if contigs.is_empty() {
            bail!("BCF input has no ##contig dictionary lines in its text header");
        }
        let header = vcf::build_header(&vcf_header, contigs)?;
        Pipeline::create(output, header)?
    };
    pipeline.apply_config(config);

    while pos + 8 <= decompressed.len() {
        let l_shared = u32::from_le_bytes(decompressed[pos..pos + 4].try_into().unwrap());
        let l_indiv = u32::from_le_bytes(decompressed[pos + 4..pos + 8].try_into().unwrap());
        let record_len = 8 + l_shared as usize + l_indiv as usize;
        if pos + record_len > decompressed.len() {
            bail!("truncated BCF record at byte offset {pos}");
        }
        let record_buf = &decompressed[pos..pos + record_len];
        let (rec_header, genotypes) = bcf::parse_record(record_buf, n_samples)?;
        pos += record_len;

        let contig_name = pipeline
            .header()
            .contigs
            .iter()
            .find(|c| c.id as i32 == rec_header.chrom_id)
            .map(|c| c.name.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown BCF contig id {}", rec_header.chrom_id))?;

        // BCF allele strings aren't decoded here (ID/allele fields are
        // skipped, not materialized) so simplicity is judged on rlen/n_allele
        // alone: a true biallelic SNP always has rlen == 1 and exactly 2
        // alleles (REF + one ALT).
        let is_snp = rec_header.rlen == 1 && rec_header.n_allele == 2;
        pipeline.ingest_variant(
            &contig_name,
            rec_header.position,
            b'N',
            b'N',
            is_snp,
            &genotypes,
        )?;
    }

    let stats = pipeline.stats();
    let index = pipeline.finish()?;
    report_ingest(&index, stats);
    Ok(())
}

fn report_ingest(index: &twk_core::Index, stats: ingest::IngestStats) {
    log::info!(
        "ingested {} variants into {} blocks ({} dropped non-SNP, {} dropped missingness, {} dropped duplicate)",
        human_count(stats.n_ingested),
        index.len(),
        stats.n_dropped_non_snp,
        stats.n_dropped_missingness,
        stats.n_dropped_duplicate,
    );
}

// ── sort / merge ───────────────────────────────────────────────────────────

fn run_sort(input: PathBuf, output: PathBuf, threads: usize, memory_limit: usize) -> anyhow::Result<()> {
    let output = twk_path(&output);
    let t0 = Instant::now();
    let config = sort::SortConfig { n_threads: threads, memory_limit };
    match sort::sort(&input, &output, config)? {
        sort::SortOutcome::AlreadySorted => {
            log::info!("{input:?} is already sorted, nothing written");
        }
        sort::SortOutcome::Written(index) => {
            log::info!(
                "sort phase 1: {} blocks in {:.3}s",
                index.len(),
                t0.elapsed().as_secs_f64()
            );
        }
    }
    Ok(())
}

fn run_merge(input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let output = twk_path(&output);
    let t0 = Instant::now();
    let index = merge::sort_merge(&input, &output, merge::DEFAULT_MERGE_FLUSH_LIMIT)?;
    log::info!(
        "merge: {} blocks in {:.3}s",
        index.len(),
        t0.elapsed().as_secs_f64()
    );
    Ok(())
}

// ── calc ───────────────────────────────────────────────────────────────────

fn run_calc(input: PathBuf, output: PathBuf, window: u32) -> anyhow::Result<()> {
    let output = twk_path(&output);
    let t0 = Instant::now();

    let mut reader = Reader::open(&input).with_context(|| format!("opening {input:?}"))?;
    let n_samples = reader.header.n_samples();
    let width = reader.header.width;

    let mut out_header = reader.header.clone();
    out_header.append_literal("##twk_calcCommand=twk calc");
    let mut writer = Writer::create(&output, out_header)?;

    let mut pending = Vec::new();
    let mut block_contig = None;
    let mut block_min = 0u32;
    let mut block_max = 0u32;
    let mut block_n = 0u32;
    let mut n_pairs = 0u64;

    let n_blocks = reader.block_count();
    for block_id in 0..n_blocks {
        let contig_id = reader.index().at(block_id).contig_id;
        let raw = reader.read_block(block_id)?.to_vec();
        let n_variants = reader.index().at(block_id).n_variants as usize;
        let meta_bytes_len = n_variants * VARIANT_META_SIZE;
        let (meta_bytes, genotype_bytes) = raw.split_at(meta_bytes_len);

        let mut variants = Vec::with_capacity(n_variants);
        let mut geno_offset = 0usize;
        for i in 0..n_variants {
            let meta =
                VariantMeta::from_le_bytes(&meta_bytes[i * VARIANT_META_SIZE..(i + 1) * VARIANT_META_SIZE]);
            let run_bytes_len = meta.runs as usize * width.bytes();
            let view = GenotypeView::new(&genotype_bytes[geno_offset..geno_offset + run_bytes_len], width);
            geno_offset += run_bytes_len;
            variants.push((meta, view.dosages(n_samples)));
        }

        for i in 0..variants.len() {
            for j in (i + 1)..variants.len() {
                let (meta_a, dosages_a) = &variants[i];
                let (meta_b, dosages_b) = &variants[j];
                if meta_b.position.saturating_sub(meta_a.position) > window {
                    break;
                }
                let stats = ld::compute(dosages_a, dosages_b);
                let record = LdRecord {
                    contig_a: contig_id,
                    pos_a: meta_a.position,
                    contig_b: contig_id,
                    pos_b: meta_b.position,
                    r2: stats.r2,
                    d_prime: stats.d_prime,
                    chi_sq: stats.chi_sq,
                    p_value: stats.p_value,
                };
                pending.extend_from_slice(&record.to_le_bytes());
                if block_contig.is_none() {
                    block_contig = Some(contig_id);
                    block_min = record.pos_a;
                }
                block_max = record.pos_a;
                block_n += 1;
                n_pairs += 1;

                if pending.len() >= ingest::DEFAULT_BLOCK_FLUSH_LIMIT {
                    writer.write_block_aligned(
                        &pending,
                        block_contig.unwrap(),
                        block_min,
                        block_max,
                        block_n,
                        LdRecord::SIZE,
                    )?;
                    pending.clear();
                    block_contig = None;
                    block_n = 0;
                }
            }
        }
    }

    if block_n > 0 {
        writer.write_block_aligned(&pending, block_contig.unwrap(), block_min, block_max, block_n, LdRecord::SIZE)?;
    }
    let index = writer.finish(SortState::Unsorted)?;

    log::info!(
        "calc: {} pairs across {} blocks in {:.3}s",
        human_count(n_pairs),
        index.len(),
        t0.elapsed().as_secs_f64()
    );
    Ok(())
}

// ── view ───────────────────────────────────────────────────────────────────

fn run_view(input: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut reader = Reader::open(&input).with_context(|| format!("opening {input:?}"))?;
    let n_samples = reader.header.n_samples();
    let width = reader.header.width;

    let mut dst: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::with_capacity(
            64 * 1024,
            File::create(path).with_context(|| format!("creating {path:?}"))?,
        )),
        None => Box::new(BufWriter::with_capacity(64 * 1024, io::stdout())),
    };

    if !reader.header.literals.is_empty() {
        writeln!(dst, "{}", reader.header.literals)?;
    }
    write!(dst, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
    for sample in &reader.header.samples {
        write!(dst, "\t{sample}")?;
    }
    writeln!(dst)?;

    let n_blocks = reader.block_count();
    for block_id in 0..n_blocks {
        let contig_id = reader.index().at(block_id).contig_id;
        let contig_name = reader.header.contig_name(contig_id).to_string();
        let raw = reader.read_block(block_id)?.to_vec();
        let n_variants = reader.index().at(block_id).n_variants as usize;
        let meta_bytes_len = n_variants * VARIANT_META_SIZE;
        let (meta_bytes, genotype_bytes) = raw.split_at(meta_bytes_len);

        let mut geno_offset = 0usize;
        for i in 0..n_variants {
            let meta =
                VariantMeta::from_le_bytes(&meta_bytes[i * VARIANT_META_SIZE..(i + 1) * VARIANT_META_SIZE]);
            let run_bytes_len = meta.runs as usize * width.bytes();
            let view = GenotypeView::new(&genotype_bytes[geno_offset..geno_offset + run_bytes_len], width);
            geno_offset += run_bytes_len;

            write!(
                dst,
                "{contig_name}\t{}\t.\t{}\t{}\t.\t.\tHWE_P={:.6};MAF={:.6}\tGT",
                meta.position,
                meta.ref_allele as char,
                meta.alt_allele as char,
                meta.hwe_p,
                meta.maf
            )?;

            let sep = if meta.controller & CONTROLLER_PHASED != 0 { '|' } else { '/' };
            for run in view.runs() {
                let token = |a: u8| match a {
                    ALLELE_REF => "0",
                    ALLELE_ALT => "1",
                    ALLELE_MISSING => ".",
                    _ => ".",
                };
                for _ in 0..run.length {
                    write!(dst, "\t{}{sep}{}", token(run.allele_a), token(run.allele_b))?;
                }
            }
            writeln!(dst)?;
        }
    }

    dst.flush()?;
    Ok(())
}

// ── stat ───────────────────────────────────────────────────────────────────

fn run_stat(input: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let reader = Reader::open(&input).with_context(|| format!("opening {input:?}"))?;
    let file_size = std::fs::metadata(&input)?.len();

    println!("=== TWK file: {input:?} ===");
    println!();
    println!("  samples        : {}", reader.header.n_samples());
    println!("  contigs        : {}", reader.header.contigs.len());
    println!("  RLE word width : {} bits", reader.header.width.bits());
    println!("  blocks         : {}", reader.block_count());
    println!(
        "  sort state     : {}",
        match reader.sort_state() {
            SortState::Unsorted => "unsorted",
            SortState::PartialSorted => "partially sorted",
            SortState::Sorted => "sorted",
        }
    );
    println!("  file size      : {file_size} bytes");

    if show_blocks {
        println!();
        println!(
            "  {:>8}  {:>8}  {:>12}  {:>12}  {:>12}  {:>10}",
            "block", "contig", "min pos", "max pos", "byte range", "n_variants"
        );
        for (i, entry) in reader.index().iter().enumerate() {
            println!(
                "  {:>8}  {:>8}  {:>12}  {:>12}  {:>5}..{:<5}  {:>10}",
                i,
                entry.contig_id,
                entry.min_position,
                entry.max_position,
                entry.byte_offset,
                entry.byte_offset_end,
                entry.n_variants
            );
        }
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import { input, output, missingness, block_flush_limit, extend } => {
            run_import(input, output, missingness, block_flush_limit, extend)
        }
        Commands::Sort { input, output, threads, memory_limit } => {
            run_sort(input, output, threads, memory_limit)
        }
        Commands::Merge { input, output } => run_merge(input, output),
        Commands::Calc { input, output, window } => run_calc(input, output, window),
        Commands::View { input, output } => run_view(input, output),
        Commands::Stat { input, blocks } => run_stat(input, blocks),
    }
}
