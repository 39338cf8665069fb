use crate::{
  media::{Container, FormatDescriptor},
  Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
  Explicit,
  CombinedMp4,
  HighestAudio,
  LowestAudio,
  AnyWithAudio,
  Highest,
}

#[derive(Debug)]
pub struct Selection<'a> {
  pub format: &'a FormatDescriptor,
  pub rule: Rule,
}

pub fn choose<'a>(
  formats: &'a [FormatDescriptor],
  container: Container,
  selector: Option<&str>,
) -> Result<Selection<'a>> {
  if let Some(id) = selector {
    return formats
      .iter()
      .find(|f| f.format_id == id)
      .map(|format| Selection {
        format,
        rule: Rule::Explicit,
      })
      .ok_or(Error::NoPlayableFormat);
  }

  let picked = match container {
    Container::Mp4 => {
      first_max_by(formats.iter().filter(|f| f.is_combined_mp4()), quality)
        .map(|f| (f, Rule::CombinedMp4))
        .or_else(|| highest(formats).map(|f| (f, Rule::Highest)))
    }
    Container::Mp3 => highest_audio(formats)
      .map(|f| (f, Rule::HighestAudio))
      .or_else(|| lowest_audio(formats).map(|f| (f, Rule::LowestAudio)))
      .or_else(|| {
        first_max_by(formats.iter().filter(|f| f.has_audio), quality)
          .map(|f| (f, Rule::AnyWithAudio))
      })
      .or_else(|| highest(formats).map(|f| (f, Rule::Highest))),
  };

  picked
    .map(|(format, rule)| Selection { format, rule })
    .ok_or(Error::NoPlayableFormat)
}

fn quality(f: &FormatDescriptor) -> (u32, u64) {
  f.quality_rank()
}

fn highest(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
  first_max_by(formats.iter(), quality)
}

// only tracks with a known audio quality can be ranked as the best one
fn highest_audio(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
  let ranked = formats
    .iter()
    .filter(|f| f.is_audio_only() && f.audio_rank().is_some());
  first_max_by(ranked, |f| f.audio_rank())
}

fn lowest_audio(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
  let audio = formats.iter().filter(|f| f.is_audio_only());
  first_max_by(audio, |f| std::cmp::Reverse(f.audio_rank().unwrap_or(0)))
}

// resolver order breaks ties: the earliest of equal candidates wins
fn first_max_by<'a, K: Ord>(
  iter: impl Iterator<Item = &'a FormatDescriptor>,
  key: impl Fn(&FormatDescriptor) -> K,
) -> Option<&'a FormatDescriptor> {
  iter.fold(None, |best, f| match best {
    Some(b) if key(f) <= key(b) => Some(b),
    _ => Some(f),
  })
}
