// Full upload flow on native targets: crop a card, stage pages, split the
// tall one, prepare and build the submission.

use std::cell::RefCell;
use std::rc::Rc;

use cyoa_pipeline::{
    decode_rgba, encode, prepare_files, read_dimensions, CardCropper, CardSettings, GameDraft,
    ImageSplitter, MemoryPreviews, Millis, OutputFormat, PageList, PageSettings, PartValue,
    PipelineError, PreparedOutcome, PreviewRegistry, SplitterSettings, SplitterState, StagedFile,
};
use image::{Rgba, RgbaImage};

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |_, y| Rgba([(y % 256) as u8, (y / 256) as u8, 7, 255]));
    encode(&image, OutputFormat::Png).unwrap()
}

fn registry() -> (Rc<MemoryPreviews>, Rc<dyn PreviewRegistry>) {
    let previews = Rc::new(MemoryPreviews::new());
    let registry: Rc<dyn PreviewRegistry> = previews.clone();
    (previews, registry)
}

#[test]
fn tall_page_is_split_and_submitted_in_order() {
    let (previews, registry) = registry();

    let mut card = CardCropper::new(CardSettings::default(), registry.clone());
    card.load(&png(900, 1600), "cover.png").unwrap();
    let card_file = card.confirm().unwrap().file().clone();
    assert_eq!(read_dimensions(&card_file.bytes).unwrap().width, 600);

    let mut pages = PageList::new(&PageSettings::default(), registry.clone());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    pages.subscribe(move |files| {
        sink.borrow_mut()
            .push(files.iter().map(|file| file.name.clone()).collect::<Vec<_>>());
    });
    pages
        .append(vec![
            StagedFile::new("intro.png", "image/png", png(4, 100)),
            StagedFile::new("tall.png", "image/png", png(4, 20_000)),
            StagedFile::new("outro.png", "image/png", png(4, 100)),
        ])
        .unwrap();
    assert_eq!(pages.oversized_indices(), [1]);

    let mut splitter = ImageSplitter::new(
        pages.get(1).unwrap().image().file().clone(),
        1,
        SplitterSettings::default(),
    );
    splitter.load().unwrap();
    assert_eq!(splitter.initial_scroll_offset(), Some(4_400));
    splitter.on_crop_complete(5_000.0, Millis::new(1_000)).unwrap();
    assert!(!splitter.tick(Millis::new(1_050)));
    assert!(splitter.tick(Millis::new(1_100)));
    assert_eq!(splitter.state(), SplitterState::Previewing);

    let outcome = splitter.split().unwrap();
    pages.apply_split(outcome).unwrap();
    assert_eq!(splitter.close(), 1);

    let names: Vec<String> = pages.files().into_iter().map(|file| file.name).collect();
    assert_eq!(names, ["intro.png", "tall_top.png", "tall_bottom.png", "outro.png"]);
    assert_eq!(seen.borrow().last().unwrap(), &names);
    assert!(!pages.any_needs_split());

    let top = decode_rgba(&pages.get(1).unwrap().image().file().bytes).unwrap();
    let bottom = decode_rgba(&pages.get(2).unwrap().image().file().bytes).unwrap();
    assert_eq!(top.height(), 10_000);
    assert_eq!(bottom.height(), 10_000);
    assert_eq!(bottom.get_pixel(0, 0), &Rgba([(10_000 % 256) as u8, (10_000 / 256) as u8, 7, 255]));

    let prepared = prepare_files(&pages.files(), &PageSettings::default()).unwrap();
    assert!(prepared.iter().all(|page| page.outcome == PreparedOutcome::Encoded));

    let draft = GameDraft {
        title: "Tall Tale".into(),
        description: "Four pages".into(),
        card: Some(card_file),
        pages: pages.files(),
        pages_need_split: pages.any_needs_split(),
        ..GameDraft::default()
    };
    let parts = draft.build_submission(&prepared).unwrap();
    let uploaded: Vec<&str> = parts
        .iter()
        .filter_map(|part| match &part.value {
            PartValue::File(file) if part.name == "cyoa_pages" => Some(file.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(uploaded, ["intro.webp", "tall_top.webp", "tall_bottom.webp", "outro.webp"]);

    // Card, four pages.
    assert_eq!(previews.live_count(), 5);
    drop(pages);
    card.remove();
    assert_eq!(previews.live_count(), 0);
}

#[test]
fn unsplit_page_blocks_submission() {
    let (_previews, registry) = registry();
    let mut pages = PageList::new(&PageSettings::default(), registry);
    pages
        .append(vec![StagedFile::new("tall.png", "image/png", png(2, 16_384))])
        .unwrap();

    let draft = GameDraft {
        title: "T".into(),
        description: "D".into(),
        card: Some(StagedFile::new("cropped_image.jpg", "image/jpeg", vec![1])),
        pages: pages.files(),
        pages_need_split: pages.any_needs_split(),
        ..GameDraft::default()
    };
    let err = draft.build_submission(&[]).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidForm(_)));
    assert!(err.to_string().contains("Split them before submitting"));
}
